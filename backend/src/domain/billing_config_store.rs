//! # Billing Config Store
//!
//! Client-side copy of the server-owned billing range. Built once at startup
//! and shared by reference; dependent views read [`BillingConfigStore::snapshot`]
//! or watch [`BillingConfigStore::subscribe`].
//!
//! Sync sources:
//!
//! - one fetch when the store starts
//! - a re-fetch on every change to the configuration table
//! - a poll every [`CONFIG_POLL_INTERVAL`] in case the change feed is lost
//!
//! A 5xx answer sets `has_server_error`, which pauses the poll. Change-feed
//! and manual fetches still run, and any successful fetch clears the flag.
//! Writes are optimistic: the new range is shown immediately and a failed
//! save re-fetches the server's value instead of restoring the old one.
//! Fetches that land while a save is in flight leave the range alone.

use log::{debug, error, info, warn};
use shared::{BillingRange, SaveBillingRangeRequest};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::domain::notifications::{Notice, Notifier};
use crate::domain::session::SessionHandle;
use crate::io::billing_api::{BillingApi, BillingApiError};
use crate::storage::{ChangeFeed, ConfigSubscription};

pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BillingConfigSnapshot {
    pub range: BillingRange,
    pub has_server_error: bool,
    pub is_loading: bool,
    pub is_updating: bool,
}

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("No active session")]
    NoSession,

    #[error(transparent)]
    Api(#[from] BillingApiError),
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub poll_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            poll_interval: CONFIG_POLL_INTERVAL,
        }
    }
}

pub type ConfigUpdatedCallback = Arc<dyn Fn() + Send + Sync>;

/// Read path shared by the store and its background task
#[derive(Clone)]
struct RangeFetcher {
    session: SessionHandle,
    api: Arc<dyn BillingApi>,
    snapshot: Arc<watch::Sender<BillingConfigSnapshot>>,
}

impl RangeFetcher {
    /// Fetch and merge the server's range. No session means nothing to do.
    async fn fetch(&self) -> Result<(), BillingApiError> {
        let Some(session) = self.session.current() else {
            debug!("No session, skipping billing range fetch");
            return Ok(());
        };

        self.snapshot.send_modify(|s| s.is_loading = true);
        match self.api.fetch_billing_range(&session).await {
            Ok(partial) => {
                self.snapshot.send_modify(|s| {
                    if s.is_updating {
                        debug!("Save in flight, keeping the optimistic billing range");
                    } else {
                        s.range.merge(&partial);
                    }
                    s.has_server_error = false;
                    s.is_loading = false;
                });
                debug!("Billing range synced: {:?}", self.snapshot.borrow().range);
                Ok(())
            }
            Err(e) => {
                let server_error = e.is_server_error();
                self.snapshot.send_modify(|s| {
                    if server_error {
                        s.has_server_error = true;
                    }
                    s.is_loading = false;
                });
                warn!("Billing range fetch failed: {}", e);
                Err(e)
            }
        }
    }

    fn has_server_error(&self) -> bool {
        self.snapshot.borrow().has_server_error
    }
}

struct RunningStore {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct BillingConfigStore {
    fetcher: RangeFetcher,
    feed: ChangeFeed,
    notifier: Arc<dyn Notifier>,
    options: StoreOptions,
    on_config_updated: Option<ConfigUpdatedCallback>,
    running: Mutex<Option<RunningStore>>,
}

impl BillingConfigStore {
    pub fn new(session: SessionHandle, api: Arc<dyn BillingApi>, feed: ChangeFeed, notifier: Arc<dyn Notifier>) -> Self {
        let (snapshot, _) = watch::channel(BillingConfigSnapshot::default());
        Self {
            fetcher: RangeFetcher {
                session,
                api,
                snapshot: Arc::new(snapshot),
            },
            feed,
            notifier,
            options: StoreOptions::default(),
            on_config_updated: None,
            running: Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Called after every successful save, e.g. to refresh derived reports
    pub fn on_config_updated(mut self, callback: ConfigUpdatedCallback) -> Self {
        self.on_config_updated = Some(callback);
        self
    }

    pub fn snapshot(&self) -> BillingConfigSnapshot {
        *self.fetcher.snapshot.borrow()
    }

    pub fn range(&self) -> BillingRange {
        self.snapshot().range
    }

    pub fn subscribe(&self) -> watch::Receiver<BillingConfigSnapshot> {
        self.fetcher.snapshot.subscribe()
    }

    /// Initial fetch, then keep in sync until [`stop`](Self::stop)
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Billing config store already running");
            return;
        }

        let subscription = self.feed.subscribe_config();
        if let Err(e) = self.fetcher.fetch().await {
            error!("Initial billing range fetch failed: {}", e);
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(sync_loop(
            self.fetcher.clone(),
            subscription,
            self.options.poll_interval,
            shutdown_rx,
        ));
        *running = Some(RunningStore { shutdown, handle });
        info!("Billing config store started");
    }

    /// Returns once the sync task has exited
    pub async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown.send(());
            if let Err(e) = running.handle.await {
                error!("Billing config sync task ended abnormally: {}", e);
            }
            info!("Billing config store stopped");
        }
    }

    /// Forced re-fetch, also the way out of the degraded state
    pub async fn refresh(&self) -> Result<(), ConfigStoreError> {
        Ok(self.fetcher.fetch().await?)
    }

    pub async fn update_billing_range(
        &self,
        start_month: u8,
        end_month: u8,
        selected_month: u8,
    ) -> Result<(), ConfigStoreError> {
        let Some(session) = self.fetcher.session.current() else {
            self.notifier.notify(Notice::error(
                "Failed to save billing settings",
                ConfigStoreError::NoSession.to_string(),
            ));
            return Err(ConfigStoreError::NoSession);
        };

        let request = SaveBillingRangeRequest {
            start_month,
            end_month,
            selected_month,
        };
        self.fetcher.snapshot.send_modify(|s| {
            s.range = BillingRange {
                start_month,
                end_month,
                selected_month,
            };
            s.is_updating = true;
        });

        match self.fetcher.api.save_billing_range(&session, &request).await {
            Ok(response) => {
                self.fetcher.snapshot.send_modify(|s| {
                    s.has_server_error = false;
                    s.is_updating = false;
                });
                info!("Billing range saved: {:?}", request);
                self.notifier.notify(Notice::success(
                    "Billing settings saved",
                    response.message.unwrap_or_default(),
                ));
                if let Some(callback) = &self.on_config_updated {
                    callback();
                }
                Ok(())
            }
            Err(e) => {
                self.fetcher.snapshot.send_modify(|s| s.is_updating = false);
                error!("Billing range save failed: {}", e);
                self.notifier.notify(Notice::error("Failed to save billing settings", e.to_string()));

                // Roll back to whatever the server holds now
                if let Err(refetch) = self.fetcher.fetch().await {
                    warn!("Re-fetch after failed save also failed: {}", refetch);
                }
                Err(e.into())
            }
        }
    }
}

async fn sync_loop(
    fetcher: RangeFetcher,
    mut subscription: ConfigSubscription,
    poll_interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut poll = interval_at(Instant::now() + poll_interval, poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut feed_open = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            change = subscription.next(), if feed_open => match change {
                Some(kind) => {
                    debug!("Config table changed ({:?}), re-fetching", kind);
                    // Errors are logged inside fetch
                    let _ = fetcher.fetch().await;
                }
                None => {
                    warn!("Config change feed closed, polling only");
                    feed_open = false;
                }
            },
            _ = poll.tick() => {
                if fetcher.has_server_error() {
                    debug!("Skipping billing range poll while the server is failing");
                } else {
                    let _ = fetcher.fetch().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notifications::{ChannelNotifier, NoticeLevel};
    use crate::domain::session::Session;
    use crate::storage::{ChangeKind, RowChange};
    use async_trait::async_trait;
    use shared::{PartialBillingRange, SaveBillingRangeResponse};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::{sleep, timeout};

    const POLL: Duration = Duration::from_millis(30);
    const WAIT: Duration = Duration::from_secs(2);

    /// Scripted stand-in for the config endpoints
    #[derive(Default)]
    struct FakeBillingApi {
        server_range: std::sync::Mutex<PartialBillingRange>,
        scripted_fetches: std::sync::Mutex<VecDeque<Result<PartialBillingRange, BillingApiError>>>,
        save_result: std::sync::Mutex<Option<BillingApiError>>,
        save_gate: Option<Arc<Notify>>,
        fetch_calls: AtomicUsize,
        save_calls: AtomicUsize,
    }

    impl FakeBillingApi {
        fn serving(start: u8, end: u8, selected: u8) -> Self {
            Self {
                server_range: std::sync::Mutex::new(PartialBillingRange {
                    start_month: Some(start),
                    end_month: Some(end),
                    selected_month: Some(selected),
                }),
                ..Self::default()
            }
        }

        fn script_fetch(&self, result: Result<PartialBillingRange, BillingApiError>) {
            self.scripted_fetches.lock().unwrap().push_back(result);
        }

        fn fetches(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    fn server_error() -> BillingApiError {
        BillingApiError::Server {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[async_trait]
    impl BillingApi for FakeBillingApi {
        async fn fetch_billing_range(&self, _session: &Session) -> Result<PartialBillingRange, BillingApiError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(scripted) = self.scripted_fetches.lock().unwrap().pop_front() {
                return scripted;
            }
            Ok(*self.server_range.lock().unwrap())
        }

        async fn save_billing_range(
            &self,
            _session: &Session,
            request: &SaveBillingRangeRequest,
        ) -> Result<SaveBillingRangeResponse, BillingApiError> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.save_gate {
                gate.notified().await;
            }
            let failure = self.save_result.lock().unwrap().clone();
            match failure {
                Some(err) => Err(err),
                None => {
                    *self.server_range.lock().unwrap() = PartialBillingRange {
                        start_month: Some(request.start_month),
                        end_month: Some(request.end_month),
                        selected_month: Some(request.selected_month),
                    };
                    Ok(SaveBillingRangeResponse {
                        success: true,
                        message: Some("Saved".to_string()),
                        error: None,
                        details: None,
                    })
                }
            }
        }
    }

    fn signed_in() -> SessionHandle {
        SessionHandle::signed_in(Session::new("admin-1", "token"))
    }

    fn build(
        session: SessionHandle,
        api: Arc<FakeBillingApi>,
        feed: &ChangeFeed,
    ) -> (BillingConfigStore, tokio::sync::mpsc::UnboundedReceiver<Notice>) {
        let (notifier, notices) = ChannelNotifier::channel();
        let store = BillingConfigStore::new(session, api, feed.clone(), Arc::new(notifier))
            .with_options(StoreOptions { poll_interval: POLL });
        (store, notices)
    }

    fn range(start: u8, end: u8, selected: u8) -> BillingRange {
        BillingRange {
            start_month: start,
            end_month: end,
            selected_month: selected,
        }
    }

    #[tokio::test]
    async fn test_start_fetches_and_merges_partial_response() {
        let api = Arc::new(FakeBillingApi::default());
        api.script_fetch(Ok(PartialBillingRange {
            start_month: None,
            end_month: Some(9),
            selected_month: None,
        }));
        let feed = ChangeFeed::new();
        let (store, _notices) = build(signed_in(), api.clone(), &feed);

        store.start().await;
        assert_eq!(store.range(), range(1, 9, 0));
        assert!(!store.snapshot().is_loading);

        store.stop().await;
    }

    #[tokio::test]
    async fn test_config_change_triggers_refetch() {
        let api = Arc::new(FakeBillingApi::serving(2, 5, 0));
        let feed = ChangeFeed::new();
        let (store, _notices) = build(signed_in(), api.clone(), &feed);
        store.start().await;
        assert_eq!(store.range(), range(2, 5, 0));

        *api.server_range.lock().unwrap() = PartialBillingRange {
            start_month: Some(3),
            end_month: Some(7),
            selected_month: Some(4),
        };
        feed.publish(RowChange::GlobalConfig {
            kind: ChangeKind::Insert,
            key: "billing_start_month".to_string(),
        });

        let mut snapshots = store.subscribe();
        timeout(WAIT, snapshots.wait_for(|s| s.range == range(3, 7, 4)))
            .await
            .unwrap()
            .unwrap();
        store.stop().await;
    }

    #[tokio::test]
    async fn test_poll_pauses_on_server_error_until_push_succeeds() {
        let api = Arc::new(FakeBillingApi::serving(1, 6, 0));
        api.script_fetch(Ok(PartialBillingRange::default()));
        api.script_fetch(Err(server_error()));
        let feed = ChangeFeed::new();
        let (store, _notices) = build(signed_in(), api.clone(), &feed);
        let mut snapshots = store.subscribe();

        store.start().await;
        timeout(WAIT, snapshots.wait_for(|s| s.has_server_error))
            .await
            .unwrap()
            .unwrap();

        let calls_when_failing = api.fetches();
        sleep(POLL * 5).await;
        assert_eq!(api.fetches(), calls_when_failing, "poll must stay paused");

        feed.publish(RowChange::GlobalConfig {
            kind: ChangeKind::Update,
            key: "billing_end_month".to_string(),
        });
        timeout(WAIT, snapshots.wait_for(|s| !s.has_server_error))
            .await
            .unwrap()
            .unwrap();

        sleep(POLL * 5).await;
        assert!(api.fetches() >= calls_when_failing + 2, "poll should resume");
        store.stop().await;
    }

    #[tokio::test]
    async fn test_manual_refresh_clears_server_error() {
        let api = Arc::new(FakeBillingApi::serving(1, 6, 0));
        api.script_fetch(Err(server_error()));
        let feed = ChangeFeed::new();
        let (store, _notices) = build(signed_in(), api.clone(), &feed);

        store.start().await;
        assert!(store.snapshot().has_server_error);

        store.refresh().await.unwrap();
        assert!(!store.snapshot().has_server_error);
        store.stop().await;
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back_to_server_value() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(FakeBillingApi {
            save_gate: Some(gate.clone()),
            ..FakeBillingApi::serving(1, 6, 0)
        });
        *api.save_result.lock().unwrap() = Some(BillingApiError::Rejected {
            status: 403,
            message: "Forbidden".to_string(),
        });
        let feed = ChangeFeed::new();
        let (store, mut notices) = build(signed_in(), api.clone(), &feed);
        // No poll during the test; only the save path touches the range
        let store = Arc::new(store.with_options(StoreOptions {
            poll_interval: Duration::from_secs(60),
        }));
        store.start().await;

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.update_billing_range(4, 10, 7).await })
        };

        // Optimistic value is visible before the save resolves
        let mut snapshots = store.subscribe();
        timeout(WAIT, snapshots.wait_for(|s| s.range == range(4, 10, 7) && s.is_updating))
            .await
            .unwrap()
            .unwrap();

        // Another admin changed the server value meanwhile
        *api.server_range.lock().unwrap() = PartialBillingRange {
            start_month: Some(2),
            end_month: Some(3),
            selected_month: Some(0),
        };
        gate.notify_one();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ConfigStoreError::Api(_))));
        assert_eq!(store.range(), range(2, 3, 0));
        assert!(!store.snapshot().is_updating);
        assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Error);
        store.stop().await;
    }

    #[tokio::test]
    async fn test_fetch_during_save_keeps_optimistic_range() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(FakeBillingApi {
            save_gate: Some(gate.clone()),
            ..FakeBillingApi::serving(1, 6, 0)
        });
        let feed = ChangeFeed::new();
        let (store, _notices) = build(signed_in(), api.clone(), &feed);
        let store = Arc::new(store);
        store.start().await;

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.update_billing_range(4, 10, 7).await })
        };
        let mut snapshots = store.subscribe();
        timeout(WAIT, snapshots.wait_for(|s| s.is_updating))
            .await
            .unwrap()
            .unwrap();

        // Both a push and the poll re-fetch the old server value
        let calls = api.fetches();
        feed.publish(RowChange::GlobalConfig {
            kind: ChangeKind::Update,
            key: "billing_end_month".to_string(),
        });
        sleep(POLL * 4).await;
        assert!(api.fetches() >= calls + 2);
        assert_eq!(store.range(), range(4, 10, 7));
        assert!(store.snapshot().is_updating);

        gate.notify_one();
        pending.await.unwrap().unwrap();
        assert_eq!(store.range(), range(4, 10, 7));
        assert!(!store.snapshot().is_updating);
        store.stop().await;
    }

    #[tokio::test]
    async fn test_successful_save_runs_callback() {
        let api = Arc::new(FakeBillingApi::serving(1, 6, 0));
        let feed = ChangeFeed::new();
        let updates = Arc::new(AtomicUsize::new(0));
        let (notifier, mut notices) = ChannelNotifier::channel();
        let store = {
            let updates = updates.clone();
            BillingConfigStore::new(signed_in(), api.clone(), feed.clone(), Arc::new(notifier)).on_config_updated(
                Arc::new(move || {
                    updates.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        store.update_billing_range(3, 8, 0).await.unwrap();

        assert_eq!(store.range(), range(3, 8, 0));
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Success);
    }

    #[tokio::test]
    async fn test_without_session_reads_are_noops_and_writes_fail() {
        let api = Arc::new(FakeBillingApi::serving(3, 4, 0));
        let feed = ChangeFeed::new();
        let (store, mut notices) = build(SessionHandle::new(), api.clone(), &feed);

        store.start().await;
        store.refresh().await.unwrap();
        assert_eq!(api.fetches(), 0);
        assert_eq!(store.range(), BillingRange::default());

        let err = store.update_billing_range(2, 3, 0).await.unwrap_err();
        assert!(matches!(err, ConfigStoreError::NoSession));
        assert_eq!(api.save_calls.load(Ordering::SeqCst), 0);
        assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Error);
        store.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_sync() {
        let api = Arc::new(FakeBillingApi::serving(1, 6, 0));
        let feed = ChangeFeed::new();
        let (store, _notices) = build(signed_in(), api.clone(), &feed);
        store.start().await;
        assert_eq!(feed.subscriber_count(), 1);

        store.stop().await;
        assert_eq!(feed.subscriber_count(), 0);
        let calls = api.fetches();
        sleep(POLL * 4).await;
        assert_eq!(api.fetches(), calls);
    }
}
