//! # REST API for Weekly Dues
//!
//! Finance dashboard endpoints under `/api/finance/dues`.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use log::info;
use shared::{
    AppRole, BulkUpdateDuesRequest, DuesMatrixQuery, DuesMatrixResponse, DuesSummaryResponse, PaymentActionResponse,
};

use crate::error::ApiError;
use crate::io::rest::auth::AuthUser;
use crate::AppState;

/// Create a router for dues related APIs
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/matrix", get(get_dues_matrix))
        .route("/summary", get(get_dues_summary))
        .route("/bulk", post(bulk_update_dues))
}

/// Week-by-week status of every student in a class
pub async fn get_dues_matrix(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<DuesMatrixQuery>,
) -> Result<impl IntoResponse, ApiError> {
    info!("GET /api/finance/dues/matrix by {} - query: {:?}", user.user_id, query);

    let data = state
        .dues_service
        .dues_matrix(&query.class_id, query.month, query.year)
        .await
        .map_err(|e| ApiError::internal("Failed to fetch dues matrix", e))?;
    Ok(Json(DuesMatrixResponse { success: true, data }))
}

/// Per-class collection status over the configured billing range
pub async fn get_dues_summary(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<impl IntoResponse, ApiError> {
    info!("GET /api/finance/dues/summary by {}", user.user_id);

    let range = state
        .billing_range_service
        .get_billing_range()
        .await
        .map_err(|e| ApiError::internal("Failed to fetch configs", e))?;
    let data = state
        .dues_service
        .dues_summary(&range)
        .await
        .map_err(|e| ApiError::internal("Failed to summarise dues", e))?;
    Ok(Json(DuesSummaryResponse {
        success: true,
        range,
        data,
    }))
}

/// Set or reset a whole month for one student (Admin Dev only)
pub async fn bulk_update_dues(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<BulkUpdateDuesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("POST /api/finance/dues/bulk by {} - request: {:?}", auth.0.user_id, request);
    auth.require_role(AppRole::AdminDev)?;

    let affected_dues = state
        .dues_service
        .bulk_update(&request)
        .await
        .map_err(|e| ApiError::internal("Failed to update dues", e))?;
    Ok(Json(PaymentActionResponse {
        success: true,
        affected_dues,
        message: format!("Updated {} dues", affected_dues),
    }))
}
