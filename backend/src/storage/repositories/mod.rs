//! SQLite repositories implementing the storage traits.
//!
//! Timestamps are stored as RFC 3339 text so they survive the round trip
//! with their offset intact.

pub mod global_config_repository;
pub mod profile_repository;
pub mod session_repository;
pub mod weekly_due_repository;

pub use global_config_repository::GlobalConfigRepository;
pub use profile_repository::ProfileRepository;
pub use session_repository::SessionRepository;
pub use weekly_due_repository::WeeklyDueRepository;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use shared::PaymentStatus;

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| anyhow!("Invalid timestamp '{}': {}", raw, e))
        })
        .transpose()
}

pub(crate) fn parse_status(value: &str) -> Result<PaymentStatus> {
    value.parse::<PaymentStatus>().map_err(|e| anyhow!(e))
}
