//! # REST API for Payment Sessions
//!
//! A student opens and cancels their own payment; a finance admin confirms
//! someone else's.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use log::info;
use shared::{ConfirmPaymentRequest, PaymentActionResponse, StartPaymentRequest};

use crate::error::ApiError;
use crate::io::rest::auth::AuthUser;
use crate::AppState;

/// Create a router for payment APIs
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_payment))
        .route("/cancel", post(cancel_payment))
        .route("/confirm", post(confirm_payment))
}

pub async fn start_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<StartPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("POST /api/payment/start by {} - request: {:?}", user.user_id, request);

    let response = state
        .dues_service
        .start_payment(&user.user_id, &request)
        .await
        .map_err(|e| ApiError::internal("Failed to start payment", e))?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn cancel_payment(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<impl IntoResponse, ApiError> {
    info!("POST /api/payment/cancel by {}", user.user_id);

    let affected_dues = state
        .dues_service
        .cancel_payment(&user.user_id)
        .await
        .map_err(|e| ApiError::internal("Failed to cancel payment", e))?;
    Ok(Json(PaymentActionResponse {
        success: true,
        affected_dues,
        message: "Payment cancelled".to_string(),
    }))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("POST /api/payment/confirm by {} - request: {:?}", auth.0.user_id, request);
    auth.require_finance_admin()?;

    let affected_dues = state
        .dues_service
        .confirm_payment(&request.student_id)
        .await
        .map_err(|e| ApiError::internal("Failed to confirm payment", e))?;
    Ok(Json(PaymentActionResponse {
        success: true,
        affected_dues,
        message: "Payment confirmed".to_string(),
    }))
}
