//! # Portal Dues Backend
//!
//! Class dues for the student portal: weekly dues rows, the admin-configured
//! billing range, and the lifecycle of a student's pending payment.
//!
//! ## Architecture
//!
//! ```text
//! IO Layer (REST API, billing config HTTP client)
//!     ↓
//! Domain Layer (dues services, payment monitor, billing config store)
//!     ↓
//! Storage Layer (SQLite via sqlx, change feed, local cache)
//! ```
//!
//! The server side is wired here through [`initialize_backend`] and
//! [`create_router`]. The client-side components ([`domain::BillingConfigStore`]
//! and [`domain::PaymentLifecycleMonitor`]) are built by whoever owns the
//! session and are started and stopped explicitly.

pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod storage;

use anyhow::Result;
use axum::{
    http::{HeaderValue, Method},
    Router,
};
use log::info;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::domain::{BillingRangeService, Clock, DuesService, SystemClock};
use crate::storage::{
    DbConnection, GlobalConfigRepository, ProfileRepository, SessionRepository, SessionStorage, WeeklyDueRepository,
};

/// Main application state that holds all services
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStorage>,
    pub billing_range_service: BillingRangeService,
    pub dues_service: DuesService,
}

impl AppState {
    pub fn new(db: &DbConnection, clock: Arc<dyn Clock>) -> Self {
        let profiles = Arc::new(ProfileRepository::new(db.clone()));
        let dues = Arc::new(WeeklyDueRepository::new(db.clone()));
        let configs = Arc::new(GlobalConfigRepository::new(db.clone()));

        Self {
            sessions: Arc::new(SessionRepository::new(db.clone())),
            billing_range_service: BillingRangeService::new(configs),
            dues_service: DuesService::new(profiles, dues, clock),
        }
    }
}

/// Open the database and build the services on top of it
pub async fn initialize_backend(config: &AppConfig) -> Result<(AppState, DbConnection)> {
    info!("Setting up database at {}", config.database_url);
    let db = DbConnection::init(&config.database_url).await?;

    info!("Setting up application state");
    let state = AppState::new(&db, Arc::new(SystemClock));
    Ok((state, db))
}

/// Create the Axum router with all routes configured
pub fn create_router(app_state: AppState, cors_origin: &str) -> Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(cors_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Ok(Router::new()
        .nest("/api", io::rest::api_router())
        .layer(cors)
        .with_state(app_state))
}
