//! Dues server binary.
//!
//! Serves the REST API. With `--watch <user_id> <access_token>` it also runs
//! the client-side billing config store and payment monitor for that user in
//! the same process, so the change feed reaches them.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use portal_dues::config::AppConfig;
use portal_dues::domain::{
    BillingConfigStore, LogNotifier, Notifier, PaymentLifecycleMonitor, Session, SessionHandle,
};
use portal_dues::io::HttpBillingApi;
use portal_dues::storage::{DbConnection, FileCache, ProfileRepository, WeeklyDueRepository};
use portal_dues::{create_router, initialize_backend};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct ClientComponents {
    store: BillingConfigStore,
    monitor: PaymentLifecycleMonitor,
}

impl ClientComponents {
    async fn start(config: &AppConfig, db: &DbConnection, session: Session) -> Result<Self> {
        info!("Starting client components for {}", session.user_id);
        let session = SessionHandle::signed_in(session);
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let store = BillingConfigStore::new(
            session.clone(),
            Arc::new(HttpBillingApi::new(&config.api_url)),
            db.feed().clone(),
            notifier.clone(),
        )
        .on_config_updated(Arc::new(|| info!("Billing range changed, dependent views should reload")));
        store.start().await;

        let monitor = PaymentLifecycleMonitor::new(
            session,
            Arc::new(ProfileRepository::new(db.clone())),
            Arc::new(WeeklyDueRepository::new(db.clone())),
            db.feed().clone(),
            Arc::new(FileCache::new(config.cache_path.clone())),
            notifier,
        );
        monitor.start().await?;

        Ok(Self { store, monitor })
    }

    async fn stop(&self) {
        self.monitor.stop().await;
        self.store.stop().await;
        info!("Client components stopped");
    }
}

fn watch_session() -> Result<Option<Session>> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(None),
        [flag, user_id, access_token] if flag == "--watch" => Ok(Some(Session::new(user_id, access_token))),
        _ => bail!("Usage: portal-dues-server [--watch <user_id> <access_token>]"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let watch = watch_session()?;
    let config = AppConfig::load()?;
    let (app_state, db) = initialize_backend(&config).await?;
    let app = create_router(app_state, &config.cors_origin)?;

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let server = tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await });

    let client = match watch {
        Some(session) => Some(ClientComponents::start(&config, &db, session).await?),
        None => None,
    };

    server.await??;

    if let Some(client) = client {
        client.stop().await;
    }
    Ok(())
}
