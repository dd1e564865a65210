use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed fee charged for one week of class dues (rupiah)
pub const WEEKLY_DUE_AMOUNT: i64 = 5000;

/// Number of dues weeks tracked per month
pub const WEEKS_PER_MONTH: u8 = 4;

/// Billing range used until an admin saves one
pub const DEFAULT_BILLING_START_MONTH: u8 = 1;
pub const DEFAULT_BILLING_END_MONTH: u8 = 6;

/// `selected_month` value meaning "lifetime / all months"
pub const LIFETIME_MONTH: u8 = 0;

/// Payment state shared by profiles and weekly dues rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Unpaid
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

/// Payment-related subset of a user's profile record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentProfile {
    pub id: String,
    pub payment_status: PaymentStatus,
    /// Only meaningful while `payment_status` is `pending`
    pub payment_expires_at: Option<DateTime<Utc>>,
}

impl PaymentProfile {
    pub fn is_pending(&self) -> bool {
        self.payment_status == PaymentStatus::Pending
    }
}

/// Student profile as seen by the finance views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub full_name: String,
    pub nim: String,
    pub class_id: Option<String>,
}

/// One week of dues for one student.
///
/// Natural key is `(student_id, month, week_number, year)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyDue {
    pub id: String,
    pub student_id: String,
    pub week_number: u8,
    pub month: u8,
    pub year: i32,
    pub amount: i64,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl WeeklyDue {
    /// Copy of this row carrying a new status; `paid_at` follows the status
    pub fn with_status(&self, status: PaymentStatus, paid_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status,
            paid_at: if status == PaymentStatus::Paid { paid_at } else { None },
            ..self.clone()
        }
    }

    pub fn is_valid_week(week_number: u8) -> bool {
        (1..=WEEKS_PER_MONTH).contains(&week_number)
    }
}

/// Admin-configured window of months counted toward the active billing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRange {
    pub start_month: u8,
    pub end_month: u8,
    /// 0 means lifetime, otherwise a specific reporting month
    pub selected_month: u8,
}

impl Default for BillingRange {
    fn default() -> Self {
        Self {
            start_month: DEFAULT_BILLING_START_MONTH,
            end_month: DEFAULT_BILLING_END_MONTH,
            selected_month: LIFETIME_MONTH,
        }
    }
}

impl BillingRange {
    pub fn is_lifetime(&self) -> bool {
        self.selected_month == LIFETIME_MONTH
    }

    /// Whether dues of `month` count toward the current report
    pub fn includes_month(&self, month: u8) -> bool {
        if self.is_lifetime() {
            month >= self.start_month && month <= self.end_month
        } else {
            month == self.selected_month
        }
    }

    /// Apply only the fields the server actually sent
    pub fn merge(&mut self, partial: &PartialBillingRange) {
        if let Some(start) = partial.start_month {
            self.start_month = start;
        }
        if let Some(end) = partial.end_month {
            self.end_month = end;
        }
        if let Some(selected) = partial.selected_month {
            self.selected_month = selected;
        }
    }
}

/// Client-side view of the billing-range response; tolerates missing fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialBillingRange {
    #[serde(default)]
    pub start_month: Option<u8>,
    #[serde(default)]
    pub end_month: Option<u8>,
    #[serde(default)]
    pub selected_month: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveBillingRangeRequest {
    pub start_month: u8,
    pub end_month: u8,
    #[serde(default)]
    pub selected_month: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveBillingRangeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Application roles issued by the auth provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppRole {
    AdminDev,
    AdminKelas,
    AdminDosen,
    Mahasiswa,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppRole::AdminDev => "admin_dev",
            AppRole::AdminKelas => "admin_kelas",
            AppRole::AdminDosen => "admin_dosen",
            AppRole::Mahasiswa => "mahasiswa",
        }
    }

    /// Roles allowed to change billing settings and confirm payments
    pub fn is_finance_admin(&self) -> bool {
        matches!(self, AppRole::AdminDev | AppRole::AdminKelas)
    }
}

impl FromStr for AppRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin_dev" => Ok(AppRole::AdminDev),
            "admin_kelas" => Ok(AppRole::AdminKelas),
            "admin_dosen" => Ok(AppRole::AdminDosen),
            "mahasiswa" => Ok(AppRole::Mahasiswa),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// One row of the finance dashboard's dues matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuesMatrixRow {
    pub student_id: String,
    pub name: String,
    /// Status of weeks 1..=4, in order
    pub payments: Vec<PaymentStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuesMatrixResponse {
    pub success: bool,
    pub data: Vec<DuesMatrixRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuesMatrixQuery {
    pub class_id: String,
    pub month: Option<u8>,
    pub year: Option<i32>,
}

/// Collection status of dues for one class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuesSummary {
    pub class_id: Option<String>,
    pub total_dues: u64,
    pub paid_dues: u64,
    pub pending_dues: u64,
    pub unpaid_dues: u64,
    pub total_amount: i64,
    pub paid_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuesSummaryResponse {
    pub success: bool,
    pub range: BillingRange,
    pub data: Vec<DuesSummary>,
}

/// Target of a month-wide dues update from the matrix view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkDuesTarget {
    Paid,
    Pending,
    Unpaid,
    /// Delete the month's rows entirely
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdateDuesRequest {
    pub student_id: String,
    pub month: u8,
    pub year: i32,
    pub target_status: BulkDuesTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPaymentRequest {
    pub month: u8,
    pub year: i32,
    pub weeks: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPaymentResponse {
    pub expires_at: DateTime<Utc>,
    pub weeks: Vec<u8>,
    pub total_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub student_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentActionResponse {
    pub success: bool,
    pub affected_dues: usize,
    pub message: String,
}

/// Marker the client keeps in its local cache while a payment is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSessionMarker {
    pub student_id: String,
    pub expires_at: DateTime<Utc>,
    pub weeks: Vec<u8>,
    pub total_amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_round_trips_through_text() {
        for status in [PaymentStatus::Unpaid, PaymentStatus::Pending, PaymentStatus::Paid] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("lunas".parse::<PaymentStatus>().is_err());
        assert_eq!(serde_json::to_string(&PaymentStatus::Pending).unwrap(), "\"pending\"");
    }

    #[test]
    fn test_billing_range_defaults_to_lifetime() {
        let range = BillingRange::default();
        assert_eq!(range.start_month, 1);
        assert_eq!(range.end_month, 6);
        assert!(range.is_lifetime());
        assert!(range.includes_month(3));
        assert!(!range.includes_month(7));
    }

    #[test]
    fn test_billing_range_selected_month_narrows_report() {
        let range = BillingRange { start_month: 1, end_month: 6, selected_month: 8 };
        assert!(range.includes_month(8));
        assert!(!range.includes_month(3));
    }

    #[test]
    fn test_partial_range_only_overwrites_present_fields() {
        let mut range = BillingRange::default();
        let partial: PartialBillingRange = serde_json::from_str(r#"{"end_month": 9}"#).unwrap();
        range.merge(&partial);
        assert_eq!(range, BillingRange { start_month: 1, end_month: 9, selected_month: 0 });
    }

    #[test]
    fn test_with_status_clears_paid_at_unless_paid() {
        let now = Utc::now();
        let due = WeeklyDue {
            id: "d1".to_string(),
            student_id: "s1".to_string(),
            week_number: 2,
            month: 3,
            year: 2025,
            amount: WEEKLY_DUE_AMOUNT,
            status: PaymentStatus::Paid,
            paid_at: Some(now),
        };
        assert_eq!(due.with_status(PaymentStatus::Unpaid, Some(now)).paid_at, None);
        assert_eq!(due.with_status(PaymentStatus::Paid, Some(now)).paid_at, Some(now));
    }

    #[test]
    fn test_save_request_defaults_selected_month() {
        let request: SaveBillingRangeRequest =
            serde_json::from_str(r#"{"start_month": 2, "end_month": 5}"#).unwrap();
        assert_eq!(request.selected_month, LIFETIME_MONTH);
    }

    #[test]
    fn test_finance_admin_roles() {
        assert!(AppRole::AdminDev.is_finance_admin());
        assert!(AppRole::AdminKelas.is_finance_admin());
        assert!(!AppRole::Mahasiswa.is_finance_admin());
        assert_eq!("admin_kelas".parse::<AppRole>().unwrap(), AppRole::AdminKelas);
    }
}
