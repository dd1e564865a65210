//! # Storage Traits
//!
//! Abstractions over the remote data store. The domain layer (including the
//! payment monitor) only ever talks to these traits, so the SQLite
//! repositories can be swapped for any other store with the same contracts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{AppRole, PaymentProfile, PaymentStatus, StudentProfile, WeeklyDue};

/// Profile rows: identity fields plus the payment subset
#[async_trait]
pub trait ProfileStorage: Send + Sync {
    /// Insert or replace a student's identity fields (payment state untouched on replace)
    async fn store_profile(&self, profile: &StudentProfile) -> Result<()>;

    /// Read the payment subset of a profile
    async fn get_payment_profile(&self, id: &str) -> Result<Option<PaymentProfile>>;

    /// Write `payment_status` and `payment_expires_at` for one profile.
    /// Returns false if no profile with that id exists.
    async fn update_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Students of one class ordered by full name
    async fn list_class_students(&self, class_id: &str) -> Result<Vec<StudentProfile>>;

    /// Every student profile ordered by full name
    async fn list_students(&self) -> Result<Vec<StudentProfile>>;
}

/// Weekly dues rows keyed by `(student_id, month, week_number, year)`
#[async_trait]
pub trait WeeklyDueStorage: Send + Sync {
    /// All of a student's rows with the given status, ordered by year, month, week
    async fn list_dues_by_status(&self, student_id: &str, status: PaymentStatus) -> Result<Vec<WeeklyDue>>;

    /// Rows for a set of students, optionally narrowed to one month and year
    async fn list_dues_for_students(
        &self,
        student_ids: &[String],
        month: Option<u8>,
        year: Option<i32>,
    ) -> Result<Vec<WeeklyDue>>;

    /// Every row in the table
    async fn list_all_dues(&self) -> Result<Vec<WeeklyDue>>;

    /// Insert or update by natural key, atomically. Returns rows written.
    async fn upsert_dues(&self, dues: &[WeeklyDue]) -> Result<usize>;

    /// Delete a student's rows for one month. Returns rows deleted.
    async fn delete_month_dues(&self, student_id: &str, month: u8, year: i32) -> Result<u64>;
}

/// Key/value configuration table
#[async_trait]
pub trait GlobalConfigStorage: Send + Sync {
    /// Values present for the requested keys; missing keys are simply absent
    async fn get_values(&self, keys: &[&str]) -> Result<Vec<(String, String)>>;

    /// Upsert all entries in one transaction
    async fn set_values(&self, entries: &[(String, String)]) -> Result<()>;
}

/// Identity behind a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: AppRole,
}

/// Access tokens issued by the auth provider
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn store_session(&self, access_token: &str, user: &AuthenticatedUser) -> Result<()>;

    async fn find_session(&self, access_token: &str) -> Result<Option<AuthenticatedUser>>;

    async fn delete_session(&self, access_token: &str) -> Result<bool>;
}
