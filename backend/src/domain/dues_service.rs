//! Weekly dues domain logic.
//!
//! Covers the finance dashboard (matrix, per-class summary, month-wide bulk
//! updates) and the payment lifecycle writes that happen outside the expiry
//! monitor: a student opening a payment, an admin confirming it, and an
//! explicit cancellation.
//!
//! ## Business Rules
//!
//! - Every week costs [`WEEKLY_DUE_AMOUNT`], four weeks per month
//! - Opening a payment marks the chosen weeks `pending` and gives the profile
//!   a deadline of `now + PAYMENT_WINDOW`
//! - Weeks already `paid` are never pulled back into `pending`
//! - All writes are last-write-wins; concurrent writers are not serialised

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use shared::{
    BillingRange, BulkDuesTarget, BulkUpdateDuesRequest, DuesMatrixRow, DuesSummary, PaymentStatus,
    StartPaymentRequest, StartPaymentResponse, WeeklyDue, WEEKLY_DUE_AMOUNT, WEEKS_PER_MONTH,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::clock::Clock;
use crate::domain::errors::DomainError;
use crate::storage::{ProfileStorage, WeeklyDueStorage};

/// How long a student has to complete a payment they opened
pub const PAYMENT_WINDOW: Duration = Duration::minutes(15);

/// Move every `pending` row of a student to `status`.
///
/// Returns the number of rows written; zero when nothing was pending, which
/// makes repeated calls harmless.
pub async fn move_pending_dues(
    dues: &dyn WeeklyDueStorage,
    student_id: &str,
    status: PaymentStatus,
    paid_at: Option<DateTime<Utc>>,
) -> Result<usize> {
    let pending = dues.list_dues_by_status(student_id, PaymentStatus::Pending).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    let updated: Vec<WeeklyDue> = pending.iter().map(|due| due.with_status(status, paid_at)).collect();
    dues.upsert_dues(&updated).await
}

fn validate_month(month: u8) -> Result<(), DomainError> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(DomainError::Validation("Month must be between 1 and 12".to_string()))
    }
}

#[derive(Clone)]
pub struct DuesService {
    profiles: Arc<dyn ProfileStorage>,
    dues: Arc<dyn WeeklyDueStorage>,
    clock: Arc<dyn Clock>,
    payment_window: Duration,
}

impl DuesService {
    pub fn new(profiles: Arc<dyn ProfileStorage>, dues: Arc<dyn WeeklyDueStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            profiles,
            dues,
            clock,
            payment_window: PAYMENT_WINDOW,
        }
    }

    pub fn with_payment_window(mut self, payment_window: Duration) -> Self {
        self.payment_window = payment_window;
        self
    }

    /// Students of a class with the status of weeks 1 to 4
    pub async fn dues_matrix(&self, class_id: &str, month: Option<u8>, year: Option<i32>) -> Result<Vec<DuesMatrixRow>> {
        if class_id.trim().is_empty() {
            return Err(DomainError::Validation("class_id required".to_string()).into());
        }
        if let Some(month) = month {
            validate_month(month)?;
        }

        let students = self.profiles.list_class_students(class_id).await?;
        let student_ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();
        let rows = self.dues.list_dues_for_students(&student_ids, month, year).await?;

        let mut by_student: HashMap<&str, Vec<PaymentStatus>> = students
            .iter()
            .map(|s| (s.id.as_str(), vec![PaymentStatus::Unpaid; WEEKS_PER_MONTH as usize]))
            .collect();

        for due in &rows {
            if !WeeklyDue::is_valid_week(due.week_number) {
                debug!("Skipping due {} with week {}", due.id, due.week_number);
                continue;
            }
            match by_student.get_mut(due.student_id.as_str()) {
                Some(weeks) => weeks[(due.week_number - 1) as usize] = due.status,
                None => warn!("Due {} references student {} outside class {}", due.id, due.student_id, class_id),
            }
        }

        Ok(students
            .iter()
            .map(|s| DuesMatrixRow {
                student_id: s.id.clone(),
                name: s.full_name.clone(),
                payments: by_student.remove(s.id.as_str()).unwrap_or_default(),
            })
            .collect())
    }

    /// Collection status per class over the months the billing range counts
    pub async fn dues_summary(&self, range: &BillingRange) -> Result<Vec<DuesSummary>> {
        let students = self.profiles.list_students().await?;
        let class_of: HashMap<&str, Option<&String>> =
            students.iter().map(|s| (s.id.as_str(), s.class_id.as_ref())).collect();

        let mut summaries: BTreeMap<Option<String>, DuesSummary> = BTreeMap::new();
        for due in self.dues.list_all_dues().await? {
            if !range.includes_month(due.month) {
                continue;
            }
            let Some(class_id) = class_of.get(due.student_id.as_str()) else {
                warn!("Skipping due {}: no profile for student {}", due.id, due.student_id);
                continue;
            };

            let key = class_id.cloned();
            let summary = summaries.entry(key.clone()).or_insert_with(|| DuesSummary {
                class_id: key,
                ..DuesSummary::default()
            });
            summary.total_dues += 1;
            summary.total_amount += due.amount;
            match due.status {
                PaymentStatus::Paid => {
                    summary.paid_dues += 1;
                    summary.paid_amount += due.amount;
                }
                PaymentStatus::Pending => summary.pending_dues += 1,
                PaymentStatus::Unpaid => summary.unpaid_dues += 1,
            }
        }

        Ok(summaries.into_values().collect())
    }

    /// Set or reset all four weeks of one student's month
    pub async fn bulk_update(&self, request: &BulkUpdateDuesRequest) -> Result<usize> {
        info!("Bulk dues update: {:?}", request);
        validate_month(request.month)?;
        self.require_profile(&request.student_id).await?;

        let status = match request.target_status {
            BulkDuesTarget::Reset => {
                let deleted = self
                    .dues
                    .delete_month_dues(&request.student_id, request.month, request.year)
                    .await?;
                return Ok(deleted as usize);
            }
            BulkDuesTarget::Paid => PaymentStatus::Paid,
            BulkDuesTarget::Pending => PaymentStatus::Pending,
            BulkDuesTarget::Unpaid => PaymentStatus::Unpaid,
        };

        let paid_at = (status == PaymentStatus::Paid).then(|| self.clock.now());
        let rows: Vec<WeeklyDue> = (1..=WEEKS_PER_MONTH)
            .map(|week_number| WeeklyDue {
                id: Uuid::new_v4().to_string(),
                student_id: request.student_id.clone(),
                week_number,
                month: request.month,
                year: request.year,
                amount: WEEKLY_DUE_AMOUNT,
                status,
                paid_at,
            })
            .collect();
        self.dues.upsert_dues(&rows).await
    }

    /// Open a payment for the selected weeks of one month
    pub async fn start_payment(&self, student_id: &str, request: &StartPaymentRequest) -> Result<StartPaymentResponse> {
        validate_month(request.month)?;
        if request.weeks.is_empty() {
            return Err(DomainError::Validation("Select at least one week".to_string()).into());
        }
        if let Some(week) = request.weeks.iter().find(|w| !WeeklyDue::is_valid_week(**w)) {
            return Err(DomainError::Validation(format!("Invalid week number: {}", week)).into());
        }

        let profile = self.require_profile(student_id).await?;
        let now = self.clock.now();
        if profile.is_pending() && profile.payment_expires_at.map_or(false, |t| now < t) {
            return Err(DomainError::Validation("A payment is already pending".to_string()).into());
        }

        let existing: HashMap<u8, WeeklyDue> = self
            .dues
            .list_dues_for_students(&[student_id.to_string()], Some(request.month), Some(request.year))
            .await?
            .into_iter()
            .map(|due| (due.week_number, due))
            .collect();

        let requested: BTreeSet<u8> = request.weeks.iter().copied().collect();
        let mut rows = Vec::new();
        for week_number in requested {
            match existing.get(&week_number) {
                Some(due) if due.status == PaymentStatus::Paid => {
                    debug!("Week {} of {}/{} already paid", week_number, request.month, request.year);
                }
                Some(due) => rows.push(due.with_status(PaymentStatus::Pending, None)),
                None => rows.push(WeeklyDue {
                    id: Uuid::new_v4().to_string(),
                    student_id: student_id.to_string(),
                    week_number,
                    month: request.month,
                    year: request.year,
                    amount: WEEKLY_DUE_AMOUNT,
                    status: PaymentStatus::Pending,
                    paid_at: None,
                }),
            }
        }

        if rows.is_empty() {
            return Err(DomainError::Validation("Selected weeks are already paid".to_string()).into());
        }

        self.dues.upsert_dues(&rows).await?;
        let expires_at = now + self.payment_window;
        self.profiles
            .update_payment_status(student_id, PaymentStatus::Pending, Some(expires_at))
            .await?;

        let weeks: Vec<u8> = rows.iter().map(|r| r.week_number).collect();
        let total_amount = rows.iter().map(|r| r.amount).sum();
        info!("Student {} opened payment for weeks {:?}, expires {}", student_id, weeks, expires_at);
        Ok(StartPaymentResponse {
            expires_at,
            weeks,
            total_amount,
        })
    }

    /// Admin confirmation: pending weeks become paid
    pub async fn confirm_payment(&self, student_id: &str) -> Result<usize> {
        self.require_profile(student_id).await?;
        let now = self.clock.now();

        let confirmed = move_pending_dues(self.dues.as_ref(), student_id, PaymentStatus::Paid, Some(now)).await?;
        self.profiles
            .update_payment_status(student_id, PaymentStatus::Paid, None)
            .await?;

        info!("Confirmed {} pending dues for {}", confirmed, student_id);
        Ok(confirmed)
    }

    /// Explicit cancellation by the student or an admin
    pub async fn cancel_payment(&self, student_id: &str) -> Result<usize> {
        self.require_profile(student_id).await?;

        let cancelled = move_pending_dues(self.dues.as_ref(), student_id, PaymentStatus::Unpaid, None).await?;
        self.profiles
            .update_payment_status(student_id, PaymentStatus::Unpaid, None)
            .await?;

        info!("Cancelled payment of {} ({} dues released)", student_id, cancelled);
        Ok(cancelled)
    }

    async fn require_profile(&self, student_id: &str) -> Result<shared::PaymentProfile> {
        self.profiles
            .get_payment_profile(student_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Student {} not found", student_id)).into())
    }
}
