//! Server side of the billing-range configuration.
//!
//! The range is stored as three rows of `global_configs`. Reads fall back to
//! the default range `1..=6`, lifetime reporting, for any key that is missing
//! or does not hold a month number.

use anyhow::Result;
use log::{debug, info, warn};
use shared::{BillingRange, SaveBillingRangeRequest};
use std::sync::Arc;

use crate::domain::errors::DomainError;
use crate::storage::GlobalConfigStorage;

pub const BILLING_START_MONTH_KEY: &str = "billing_start_month";
pub const BILLING_END_MONTH_KEY: &str = "billing_end_month";
pub const BILLING_SELECTED_MONTH_KEY: &str = "billing_selected_month";

#[derive(Clone)]
pub struct BillingRangeService {
    config_storage: Arc<dyn GlobalConfigStorage>,
}

impl BillingRangeService {
    pub fn new(config_storage: Arc<dyn GlobalConfigStorage>) -> Self {
        Self { config_storage }
    }

    pub async fn get_billing_range(&self) -> Result<BillingRange> {
        let values = self
            .config_storage
            .get_values(&[
                BILLING_START_MONTH_KEY,
                BILLING_END_MONTH_KEY,
                BILLING_SELECTED_MONTH_KEY,
            ])
            .await?;

        let mut range = BillingRange::default();
        for (key, value) in values {
            let Ok(month) = value.trim().parse::<u8>() else {
                warn!("Ignoring non-numeric config {} = {:?}", key, value);
                continue;
            };
            match key.as_str() {
                BILLING_START_MONTH_KEY => range.start_month = month,
                BILLING_END_MONTH_KEY => range.end_month = month,
                BILLING_SELECTED_MONTH_KEY => range.selected_month = month,
                _ => {}
            }
        }

        debug!("Billing range: {:?}", range);
        Ok(range)
    }

    pub async fn save_billing_range(&self, request: &SaveBillingRangeRequest) -> Result<BillingRange> {
        Self::validate(request)?;

        let entries = vec![
            (BILLING_START_MONTH_KEY.to_string(), request.start_month.to_string()),
            (BILLING_END_MONTH_KEY.to_string(), request.end_month.to_string()),
            (BILLING_SELECTED_MONTH_KEY.to_string(), request.selected_month.to_string()),
        ];
        self.config_storage.set_values(&entries).await?;

        info!(
            "Saved billing range {}..={} (selected {})",
            request.start_month, request.end_month, request.selected_month
        );
        Ok(BillingRange {
            start_month: request.start_month,
            end_month: request.end_month,
            selected_month: request.selected_month,
        })
    }

    fn validate(request: &SaveBillingRangeRequest) -> Result<(), DomainError> {
        let valid_month = 1..=12;
        if !valid_month.contains(&request.start_month) || !valid_month.contains(&request.end_month) {
            return Err(DomainError::Validation(
                "Billing months must be between 1 and 12".to_string(),
            ));
        }
        if request.selected_month > 12 {
            return Err(DomainError::Validation(
                "Selected month must be between 0 and 12".to_string(),
            ));
        }
        if request.start_month > request.end_month {
            return Err(DomainError::Validation(
                "Start month cannot be greater than end month".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DbConnection, GlobalConfigRepository};

    async fn setup_test() -> BillingRangeService {
        let db = DbConnection::in_memory().await.expect("Failed to init test DB");
        BillingRangeService::new(Arc::new(GlobalConfigRepository::new(db)))
    }

    fn request(start: u8, end: u8, selected: u8) -> SaveBillingRangeRequest {
        SaveBillingRangeRequest {
            start_month: start,
            end_month: end,
            selected_month: selected,
        }
    }

    #[tokio::test]
    async fn test_defaults_when_nothing_saved() {
        let service = setup_test().await;
        assert_eq!(service.get_billing_range().await.unwrap(), BillingRange::default());
    }

    #[tokio::test]
    async fn test_save_then_read() {
        let service = setup_test().await;
        let saved = service.save_billing_range(&request(2, 9, 4)).await.unwrap();
        assert_eq!(saved, BillingRange { start_month: 2, end_month: 9, selected_month: 4 });
        assert_eq!(service.get_billing_range().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_unparsable_values_fall_back_to_defaults() {
        let service = setup_test().await;
        service
            .config_storage
            .set_values(&[
                (BILLING_START_MONTH_KEY.to_string(), "march".to_string()),
                (BILLING_END_MONTH_KEY.to_string(), "10".to_string()),
            ])
            .await
            .unwrap();

        let range = service.get_billing_range().await.unwrap();
        assert_eq!(range, BillingRange { start_month: 1, end_month: 10, selected_month: 0 });
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_ranges() {
        let service = setup_test().await;
        for bad in [request(0, 6, 0), request(1, 13, 0), request(1, 6, 13), request(7, 3, 0)] {
            let err = service.save_billing_range(&bad).await.unwrap_err();
            assert!(
                matches!(err.downcast_ref::<DomainError>(), Some(DomainError::Validation(_))),
                "expected validation error for {:?}",
                bad
            );
        }
        assert_eq!(service.get_billing_range().await.unwrap(), BillingRange::default());
    }
}
