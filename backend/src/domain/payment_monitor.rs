//! # Payment Lifecycle Monitor
//!
//! Watches the signed-in student's payment state and puts an expired
//! `pending` payment back to `unpaid`.
//!
//! ## State machine
//!
//! ```text
//!            pending (read or push)
//!   Idle ─────────────────────────────▶ Armed ──┐ tick / push, not expired
//!    ▲  ◀── push: paid / unpaid ───────   │  ◀──┘
//!    │                                    │ now >= expires_at
//!    └────────── revert done ─────── Reverting
//!
//!   any state ── stop() ──▶ Terminal
//! ```
//!
//! One task per monitored student owns the only timer. Profile pushes do not
//! run checks of their own; they reschedule the task's next check to
//! `min(now + interval, expires_at)`. Reverts go through [`PaymentReverter`],
//! which is single-flight and only notifies when something actually changed,
//! so concurrent callers (an admin tool, a second window) cannot double the
//! notice.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use shared::{PaymentProfile, PaymentSessionMarker, PaymentStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::domain::clock::{Clock, SystemClock};
use crate::domain::dues_service::move_pending_dues;
use crate::domain::notifications::{Notice, Notifier};
use crate::domain::session::{CurrentRoute, SessionHandle};
use crate::storage::{ChangeFeed, LocalCache, ProfileChange, ProfileStorage, ProfileSubscription, WeeklyDueStorage};

/// Longest gap between two expiry checks while a payment is pending
pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Local cache key of the open payment marker
pub const PAYMENT_SESSION_KEY: &str = "payment_session";

/// Screen on which the student confirms their own payment
pub const PAYMENT_SCREEN_ROUTE: &str = "/payment";

/// Inclusive deadline check. A missing deadline never expires.
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

/// Open payment marker left by the payment screen, if any
pub fn load_payment_session(cache: &dyn LocalCache) -> Result<Option<PaymentSessionMarker>> {
    match cache.get(PAYMENT_SESSION_KEY)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Armed { expires_at: Option<DateTime<Utc>> },
    Reverting,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertOutcome {
    /// Dues rows moved from `pending` to `unpaid` by this call
    pub reverted_dues: usize,
    pub profile_was_pending: bool,
}

impl RevertOutcome {
    pub fn transitioned(&self) -> bool {
        self.reverted_dues > 0 || self.profile_was_pending
    }
}

/// Puts a student's pending payment back to unpaid
pub struct PaymentReverter {
    profiles: Arc<dyn ProfileStorage>,
    dues: Arc<dyn WeeklyDueStorage>,
    cache: Arc<dyn LocalCache>,
    notifier: Arc<dyn Notifier>,
    in_flight: Mutex<()>,
}

impl PaymentReverter {
    pub fn new(
        profiles: Arc<dyn ProfileStorage>,
        dues: Arc<dyn WeeklyDueStorage>,
        cache: Arc<dyn LocalCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            profiles,
            dues,
            cache,
            notifier,
            in_flight: Mutex::new(()),
        }
    }

    /// Revert the student's pending dues and profile.
    ///
    /// Safe to call repeatedly: a second call finds nothing pending, rewrites
    /// the already-unpaid profile and raises no notice.
    pub async fn revert(&self, student_id: &str) -> Result<RevertOutcome> {
        let _flight = self.in_flight.lock().await;
        info!("Reverting expired payment of {}", student_id);

        let profile_was_pending = self
            .profiles
            .get_payment_profile(student_id)
            .await?
            .map_or(false, |p| p.is_pending());

        let reverted_dues = move_pending_dues(self.dues.as_ref(), student_id, PaymentStatus::Unpaid, None).await?;

        self.profiles
            .update_payment_status(student_id, PaymentStatus::Unpaid, None)
            .await?;

        if let Err(e) = self.cache.remove(PAYMENT_SESSION_KEY) {
            warn!("Failed to clear payment session marker: {}", e);
        }

        let outcome = RevertOutcome {
            reverted_dues,
            profile_was_pending,
        };
        if outcome.transitioned() {
            self.notifier.notify(Notice::info(
                "Payment session ended. Your dues are back to unpaid.",
                "The payment window ran out or was cancelled.",
            ));
        } else {
            debug!("Nothing pending for {}, revert was a no-op", student_id);
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub check_interval: Duration,
    /// Route on which the "payment verified" notice is suppressed
    pub payment_route: String,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            check_interval: EXPIRY_CHECK_INTERVAL,
            payment_route: PAYMENT_SCREEN_ROUTE.to_string(),
        }
    }
}

struct RunningMonitor {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct PaymentLifecycleMonitor {
    session: SessionHandle,
    route: CurrentRoute,
    profiles: Arc<dyn ProfileStorage>,
    feed: ChangeFeed,
    cache: Arc<dyn LocalCache>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    reverter: Arc<PaymentReverter>,
    options: MonitorOptions,
    state: Arc<watch::Sender<MonitorState>>,
    running: Mutex<Option<RunningMonitor>>,
}

impl PaymentLifecycleMonitor {
    pub fn new(
        session: SessionHandle,
        profiles: Arc<dyn ProfileStorage>,
        dues: Arc<dyn WeeklyDueStorage>,
        feed: ChangeFeed,
        cache: Arc<dyn LocalCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let reverter = Arc::new(PaymentReverter::new(
            profiles.clone(),
            dues,
            cache.clone(),
            notifier.clone(),
        ));
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            session,
            route: CurrentRoute::default(),
            profiles,
            feed,
            cache,
            notifier,
            clock: Arc::new(SystemClock),
            reverter,
            options: MonitorOptions::default(),
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    pub fn with_route(mut self, route: CurrentRoute) -> Self {
        self.route = route;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// The revert routine this monitor uses, shared with other callers
    pub fn reverter(&self) -> Arc<PaymentReverter> {
        self.reverter.clone()
    }

    /// Begin watching the signed-in student. Without a session this does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Payment monitor already running");
            return Ok(());
        }

        let Some(session) = self.session.current() else {
            debug!("No session, payment monitor stays idle");
            self.state.send_replace(MonitorState::Idle);
            return Ok(());
        };
        let student_id = session.user_id;

        // Subscribe before reading so no update between the two is lost
        let subscription = self.feed.subscribe_profile(&student_id);
        let initial = match self.profiles.get_payment_profile(&student_id).await {
            Ok(profile) => profile,
            Err(e) => {
                error!("Payment monitor could not read profile {}: {}", student_id, e);
                None
            }
        };

        let mut worker = MonitorWorker {
            student_id,
            profiles: self.profiles.clone(),
            route: self.route.clone(),
            cache: self.cache.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            reverter: self.reverter.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            next_check: None,
        };
        match initial {
            // Check right away, then every interval
            Some(profile) if profile.is_pending() => worker.arm(profile.payment_expires_at, Instant::now()),
            Some(profile) => {
                if profile.payment_status == PaymentStatus::Unpaid {
                    self.drop_stale_marker();
                }
                worker.set_state(MonitorState::Idle);
            }
            None => worker.set_state(MonitorState::Idle),
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(worker.run(subscription, shutdown_rx));
        *running = Some(RunningMonitor { shutdown, handle });
        info!("Payment monitor started");
        Ok(())
    }

    /// Logout: stop watching, wipe the local cache, drop the credentials
    pub async fn sign_out(&self) {
        self.stop().await;
        if let Err(e) = self.cache.clear() {
            warn!("Failed to clear local cache on sign out: {}", e);
        }
        self.session.sign_out();
        info!("Signed out");
    }

    /// A marker for a payment that ended while nobody was watching
    fn drop_stale_marker(&self) {
        match load_payment_session(self.cache.as_ref()) {
            Ok(Some(marker)) => {
                info!("Dropping stale payment marker that expired at {}", marker.expires_at);
                if let Err(e) = self.cache.remove(PAYMENT_SESSION_KEY) {
                    warn!("Failed to clear payment session marker: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Unreadable payment marker, removing it: {}", e);
                if let Err(e) = self.cache.remove(PAYMENT_SESSION_KEY) {
                    warn!("Failed to clear payment session marker: {}", e);
                }
            }
        }
    }

    /// Tear down. Returns once the background task has exited.
    pub async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown.send(());
            if let Err(e) = running.handle.await {
                error!("Payment monitor task ended abnormally: {}", e);
            }
            info!("Payment monitor stopped");
        }
        self.state.send_replace(MonitorState::Terminal);
    }
}

struct MonitorWorker {
    student_id: String,
    profiles: Arc<dyn ProfileStorage>,
    route: CurrentRoute,
    cache: Arc<dyn LocalCache>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    reverter: Arc<PaymentReverter>,
    options: MonitorOptions,
    state: Arc<watch::Sender<MonitorState>>,
    next_check: Option<Instant>,
}

impl MonitorWorker {
    async fn run(mut self, mut subscription: ProfileSubscription, mut shutdown: oneshot::Receiver<()>) {
        let mut feed_open = true;
        loop {
            let next_check = self.next_check;
            tokio::select! {
                _ = &mut shutdown => break,
                update = subscription.next(), if feed_open => match update {
                    Some(ProfileChange::Updated(profile)) => self.on_profile_update(profile),
                    Some(ProfileChange::Missed(_)) => self.resync().await,
                    None => {
                        warn!("Profile change feed closed, relying on timer only");
                        feed_open = false;
                    }
                },
                _ = sleep_until(next_check.unwrap_or_else(Instant::now)), if next_check.is_some() => {
                    self.on_check().await;
                }
            }
        }
        debug!("Payment monitor loop for {} exited", self.student_id);
    }

    fn set_state(&self, state: MonitorState) {
        self.state.send_replace(state);
    }

    /// Enter or stay in `Armed` and schedule the next check
    fn arm(&mut self, expires_at: Option<DateTime<Utc>>, at: Instant) {
        self.set_state(MonitorState::Armed { expires_at });
        self.next_check = Some(at);
    }

    fn schedule_after_interval(&mut self, expires_at: Option<DateTime<Utc>>) {
        let mut delay = self.options.check_interval;
        if let Some(deadline) = expires_at {
            let remaining = (deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            delay = delay.min(remaining);
        }
        self.arm(expires_at, Instant::now() + delay);
    }

    fn disarm(&mut self) {
        self.next_check = None;
        self.set_state(MonitorState::Idle);
    }

    fn on_profile_update(&mut self, profile: PaymentProfile) {
        debug!("Profile update for {}: {}", profile.id, profile.payment_status);
        match profile.payment_status {
            PaymentStatus::Pending => self.schedule_after_interval(profile.payment_expires_at),
            PaymentStatus::Paid => {
                if !self.route.is(&self.options.payment_route) {
                    self.notifier.notify(Notice::success(
                        "Payment verified!",
                        "Thank you for paying your class dues.",
                    ));
                }
                self.disarm();
            }
            PaymentStatus::Unpaid => {
                if let Err(e) = self.cache.remove(PAYMENT_SESSION_KEY) {
                    warn!("Failed to clear payment session marker: {}", e);
                }
                self.disarm();
            }
        }
    }

    /// Pushes were dropped; take the stored row as if it had been pushed
    async fn resync(&mut self) {
        match self.profiles.get_payment_profile(&self.student_id).await {
            Ok(Some(profile)) => self.on_profile_update(profile),
            Ok(None) => {
                warn!("Profile {} disappeared, payment monitor going idle", self.student_id);
                self.disarm();
            }
            // An armed timer re-reads on its next check
            Err(e) => error!("Payment monitor could not resync profile {}: {}", self.student_id, e),
        }
    }

    async fn on_check(&mut self) {
        let current = *self.state.borrow();
        let MonitorState::Armed { expires_at: cached } = current else {
            self.next_check = None;
            return;
        };

        // The cached deadline is only as fresh as the last push we saw
        let profile = match self.profiles.get_payment_profile(&self.student_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!("Profile {} disappeared, payment monitor going idle", self.student_id);
                self.disarm();
                return;
            }
            Err(e) => {
                error!("Expiry check could not read profile {}: {}", self.student_id, e);
                self.schedule_after_interval(cached);
                return;
            }
        };
        if !profile.is_pending() {
            // Notices belong to the push (or resync) that carries this change
            debug!("Profile {} is {}, nothing to expire", self.student_id, profile.payment_status);
            self.disarm();
            return;
        }

        let expires_at = profile.payment_expires_at;
        if !is_expired(expires_at, self.clock.now()) {
            self.schedule_after_interval(expires_at);
            return;
        }

        info!("Payment of {} expired at {:?}", self.student_id, expires_at);
        self.next_check = None;
        self.set_state(MonitorState::Reverting);
        match self.reverter.revert(&self.student_id).await {
            Ok(outcome) => debug!("Revert finished: {:?}", outcome),
            // No retry; a later pending push re-arms the timer
            Err(e) => error!("Failed to revert payment of {}: {}", self.student_id, e),
        }
        self.set_state(MonitorState::Idle);
    }
}
