//! # REST API Interface Layer
//!
//! HTTP endpoints of the dues backend, all mounted under `/api` and all
//! requiring a bearer token. Handlers only translate: they log the call,
//! check the caller's role, hand off to a domain service and map its errors
//! through [`ApiError`](crate::error::ApiError).

pub mod auth;
pub mod config_apis;
pub mod dues_apis;
pub mod payment_apis;

use axum::Router;

use crate::AppState;

/// Every API route, relative to `/api`
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/config", config_apis::router())
        .nest("/finance/dues", dues_apis::router())
        .nest("/payment", payment_apis::router())
}
