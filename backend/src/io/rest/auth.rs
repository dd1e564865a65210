//! Bearer-token authentication for the REST layer.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use log::debug;
use shared::AppRole;

use crate::error::ApiError;
use crate::storage::AuthenticatedUser;
use crate::AppState;

/// The caller behind `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

impl AuthUser {
    pub fn require_finance_admin(&self) -> Result<(), ApiError> {
        if self.0.role.is_finance_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "Only Admin Dev or Class Admin can perform this action".to_string(),
            ))
        }
    }

    pub fn require_role(&self, role: AppRole) -> Result<(), ApiError> {
        if self.0.role == role {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("Requires role {}", role.as_str())))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            debug!("Request without bearer token");
            return Err(ApiError::Unauthorized);
        };

        match state.sessions.find_session(token).await {
            Ok(Some(user)) => Ok(AuthUser(user)),
            Ok(None) => Err(ApiError::Unauthorized),
            Err(e) => Err(ApiError::internal("Failed to verify session", e)),
        }
    }
}
