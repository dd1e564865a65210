//! Explicit handles for the signed-in user and the screen they are on.
//!
//! Both are cheap to clone and shared between the UI layer, which updates
//! them, and the background components, which only read.

use std::sync::{Arc, RwLock};

/// Credentials of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionHandle {
    /// Handle with nobody signed in
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(session: Session) -> Self {
        let handle = Self::new();
        handle.sign_in(session);
        handle
    }

    pub fn current(&self) -> Option<Session> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sign_in(&self, session: Session) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Some(session),
            Err(poisoned) => *poisoned.into_inner() = Some(session),
        }
    }

    /// Forget the credentials only. A full logout goes through
    /// [`PaymentLifecycleMonitor::sign_out`](crate::domain::PaymentLifecycleMonitor::sign_out),
    /// which also stops the monitor and clears the local cache.
    pub fn sign_out(&self) {
        match self.inner.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Route of the screen currently shown to the user
#[derive(Debug, Clone, Default)]
pub struct CurrentRoute {
    inner: Arc<RwLock<String>>,
}

impl CurrentRoute {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(route.into())),
        }
    }

    pub fn get(&self) -> String {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, route: impl Into<String>) {
        let route = route.into();
        match self.inner.write() {
            Ok(mut guard) => *guard = route,
            Err(poisoned) => *poisoned.into_inner() = route,
        }
    }

    pub fn is(&self, route: &str) -> bool {
        self.get() == route
    }
}
