//! HTTP access to the billing-range configuration endpoints.
//!
//! [`BillingApi`] is what the config store talks to; [`HttpBillingApi`] is
//! the reqwest implementation against `{base_url}/config/*`.

use async_trait::async_trait;
use log::debug;
use shared::{PartialBillingRange, SaveBillingRangeRequest, SaveBillingRangeResponse};
use std::time::Duration;
use thiserror::Error;

use crate::domain::session::Session;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Error)]
pub enum BillingApiError {
    /// DNS, connect, TLS or timeout failure
    #[error("Network error: {0}")]
    Network(String),

    /// 5xx from the server
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success answer, including `success: false` bodies
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl BillingApiError {
    pub fn network(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn fetch_billing_range(&self, session: &Session) -> Result<PartialBillingRange, BillingApiError>;

    async fn save_billing_range(
        &self,
        session: &Session,
        request: &SaveBillingRangeRequest,
    ) -> Result<SaveBillingRangeResponse, BillingApiError>;
}

#[derive(Clone)]
pub struct HttpBillingApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBillingApi {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Pull a human readable message out of an error body
    fn error_message(body: &str) -> String {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                let error = v.get("error")?.as_str()?.to_string();
                match v.get("details").and_then(|d| d.as_str()) {
                    Some(details) => Some(format!("{}: {}", error, details)),
                    None => Some(error),
                }
            })
            .unwrap_or_else(|| body.to_string())
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, BillingApiError> {
        let status = resp.status();
        let body = resp.text().await.map_err(BillingApiError::network)?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| BillingApiError::Decode(e.to_string()));
        }

        let message = Self::error_message(&body);
        if status.is_server_error() {
            Err(BillingApiError::Server {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(BillingApiError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl BillingApi for HttpBillingApi {
    async fn fetch_billing_range(&self, session: &Session) -> Result<PartialBillingRange, BillingApiError> {
        debug!("GET billing range");
        let resp = self
            .http
            .get(self.url("/config/billing-range"))
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(BillingApiError::network)?;

        Self::handle_response(resp).await
    }

    async fn save_billing_range(
        &self,
        session: &Session,
        request: &SaveBillingRangeRequest,
    ) -> Result<SaveBillingRangeResponse, BillingApiError> {
        debug!("POST billing range {:?}", request);
        let resp = self
            .http
            .post(self.url("/config/save-range"))
            .bearer_auth(&session.access_token)
            .json(request)
            .send()
            .await
            .map_err(BillingApiError::network)?;

        let response: SaveBillingRangeResponse = Self::handle_response(resp).await?;
        if !response.success {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| "Save was not accepted".to_string());
            return Err(BillingApiError::Rejected { status: 200, message });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    fn session() -> Session {
        Session::new("admin-1", "secret-token")
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_and_tolerates_missing_fields() {
        let router = Router::new().route(
            "/api/config/billing-range",
            get(|headers: HeaderMap| async move {
                let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
                if auth == Some("Bearer secret-token") {
                    (StatusCode::OK, Json(json!({ "start_month": 3, "end_month": 8 })))
                } else {
                    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" })))
                }
            }),
        );
        let api = HttpBillingApi::new(&serve(router).await);

        let range = api.fetch_billing_range(&session()).await.unwrap();
        assert_eq!(range.start_month, Some(3));
        assert_eq!(range.end_month, Some(8));
        assert_eq!(range.selected_month, None);

        let err = api.fetch_billing_range(&Session::new("x", "wrong")).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_server_error());
    }

    #[tokio::test]
    async fn test_server_errors_are_flagged() {
        let router = Router::new()
            .route(
                "/api/config/billing-range",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            )
            .route(
                "/api/config/save-range",
                post(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "success": false, "error": "Failed to save", "details": "disk full" })),
                    )
                }),
            );
        let api = HttpBillingApi::new(&serve(router).await);

        let err = api.fetch_billing_range(&session()).await.unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(err.status(), Some(502));

        let request = SaveBillingRangeRequest { start_month: 1, end_month: 6, selected_month: 0 };
        match api.save_billing_range(&session(), &request).await.unwrap_err() {
            BillingApiError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Failed to save: disk full");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let api = HttpBillingApi::new(&format!("http://{}/api", addr));
        let err = api.fetch_billing_range(&session()).await.unwrap_err();
        assert!(matches!(err, BillingApiError::Network(_)));
    }
}
