//! # REST API for Billing Configuration
//!
//! `GET /api/config/billing-range` and `POST /api/config/save-range`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use log::info;
use shared::{SaveBillingRangeRequest, SaveBillingRangeResponse};

use crate::error::ApiError;
use crate::io::rest::auth::AuthUser;
use crate::AppState;

/// Create a router for billing configuration APIs
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/billing-range", get(get_billing_range))
        .route("/save-range", post(save_billing_range))
}

/// Current billing range, defaults filled in
pub async fn get_billing_range(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<impl IntoResponse, ApiError> {
    info!("GET /api/config/billing-range by {}", user.user_id);

    let range = state
        .billing_range_service
        .get_billing_range()
        .await
        .map_err(|e| ApiError::internal("Failed to fetch configs", e))?;
    Ok((StatusCode::OK, Json(range)))
}

/// Save the billing range (finance admins only)
pub async fn save_billing_range(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<SaveBillingRangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("POST /api/config/save-range by {} - request: {:?}", auth.0.user_id, request);
    auth.require_finance_admin()?;

    state
        .billing_range_service
        .save_billing_range(&request)
        .await
        .map_err(|e| ApiError::internal("Failed to save billing configuration", e))?;

    Ok(Json(SaveBillingRangeResponse {
        success: true,
        message: Some("Billing configuration synced to database".to_string()),
        error: None,
        details: None,
    }))
}
