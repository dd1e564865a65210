//! # Change Feed
//!
//! Row-level change notifications for the tables the dues core cares about.
//! Repositories publish after every successful write; consumers subscribe
//! either to one subject's profile updates or to any configuration change.
//! Dropping a subscription is the unsubscribe.

use log::warn;
use shared::PaymentProfile;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single row change, carrying the new row where consumers need it
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Profile {
        kind: ChangeKind,
        record: PaymentProfile,
    },
    WeeklyDue {
        kind: ChangeKind,
        student_id: String,
    },
    GlobalConfig {
        kind: ChangeKind,
        key: String,
    },
}

#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<RowChange>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    /// Publish a change; having no subscribers is not an error
    pub fn publish(&self, change: RowChange) {
        let _ = self.sender.send(change);
    }

    /// UPDATE events on the profile of `subject_id` only
    pub fn subscribe_profile(&self, subject_id: &str) -> ProfileSubscription {
        ProfileSubscription {
            receiver: self.sender.subscribe(),
            subject_id: subject_id.to_string(),
        }
    }

    /// Any insert, update or delete on the configuration table
    pub fn subscribe_config(&self) -> ConfigSubscription {
        ConfigSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// What a profile subscription yields
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileChange {
    Updated(PaymentProfile),
    /// The receiver fell behind and dropped this many changes; re-read the row
    Missed(u64),
}

pub struct ProfileSubscription {
    receiver: broadcast::Receiver<RowChange>,
    subject_id: String,
}

impl ProfileSubscription {
    /// Next updated profile row for the subject, or `None` once the feed is gone.
    ///
    /// A lag is reported as [`ProfileChange::Missed`] since the skipped
    /// changes may include an update for the subject.
    pub async fn next(&mut self) -> Option<ProfileChange> {
        loop {
            match self.receiver.recv().await {
                Ok(RowChange::Profile {
                    kind: ChangeKind::Update,
                    record,
                }) if record.id == self.subject_id => return Some(ProfileChange::Updated(record)),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        "Profile subscription for {} lagged, skipped {} changes",
                        self.subject_id, missed
                    );
                    return Some(ProfileChange::Missed(missed));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

pub struct ConfigSubscription {
    receiver: broadcast::Receiver<RowChange>,
}

impl ConfigSubscription {
    /// Wait for the next configuration change; the payload is not needed
    pub async fn next(&mut self) -> Option<ChangeKind> {
        loop {
            match self.receiver.recv().await {
                Ok(RowChange::GlobalConfig { kind, .. }) => return Some(kind),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    // Something changed; one re-fetch covers all of it
                    warn!("Config subscription lagged, skipped {} changes", missed);
                    return Some(ChangeKind::Update);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
