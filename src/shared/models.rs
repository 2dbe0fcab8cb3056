use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use super::schema;
pub use super::schema::{collection_actions, execution_logs, invoices, payment_plans};

/// Invoice lifecycle states. Stored as text; `SENT`, `OVERDUE` and `PARTIAL`
/// are the active states a collection run may act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Overdue,
    Partial,
    Paid,
    Disputed,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Sent => "SENT",
            Self::Overdue => "OVERDUE",
            Self::Partial => "PARTIAL",
            Self::Paid => "PAID",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DRAFT" => Some(Self::Draft),
            "SENT" => Some(Self::Sent),
            "OVERDUE" => Some(Self::Overdue),
            "PARTIAL" => Some(Self::Partial),
            "PAID" => Some(Self::Paid),
            "DISPUTED" => Some(Self::Disputed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Sent | Self::Overdue | Self::Partial)
    }
}

/// Ordered severity of the collection treatment applied to an invoice.
/// Stored as an integer column so the ordering survives the database round
/// trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationLevel {
    None = 0,
    FriendlyReminder = 1,
    FirmReminder = 2,
    UrgentNotice = 3,
    FinalNotice = 4,
    LegalWarning = 5,
}

impl EscalationLevel {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::FriendlyReminder),
            2 => Some(Self::FirmReminder),
            3 => Some(Self::UrgentNotice),
            4 => Some(Self::FinalNotice),
            5 => Some(Self::LegalWarning),
            _ => None,
        }
    }

    /// The next rung of the ladder; `LEGAL_WARNING` is terminal.
    pub fn next(&self) -> Self {
        match self {
            Self::None => Self::FriendlyReminder,
            Self::FriendlyReminder => Self::FirmReminder,
            Self::FirmReminder => Self::UrgentNotice,
            Self::UrgentNotice => Self::FinalNotice,
            Self::FinalNotice => Self::LegalWarning,
            Self::LegalWarning => Self::LegalWarning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::FriendlyReminder => "FRIENDLY_REMINDER",
            Self::FirmReminder => "FIRM_REMINDER",
            Self::UrgentNotice => "URGENT_NOTICE",
            Self::FinalNotice => "FINAL_NOTICE",
            Self::LegalWarning => "LEGAL_WARNING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Scheduled,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(
    Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset, Identifiable,
)]
#[diesel(table_name = invoices)]
pub struct Invoice {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub total: BigDecimal,
    pub amount_paid: BigDecimal,
    pub currency: String,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub status: String,
    pub escalation_level: i32,
    pub follow_up_count: i32,
    pub last_follow_up_at: Option<DateTime<Utc>>,
    pub next_action_date: Option<DateTime<Utc>>,
    pub agent_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::parse(&self.status).unwrap_or(InvoiceStatus::Draft)
    }

    pub fn set_status(&mut self, status: InvoiceStatus) {
        self.status = status.as_str().to_string();
    }

    pub fn escalation(&self) -> EscalationLevel {
        EscalationLevel::from_i32(self.escalation_level).unwrap_or(EscalationLevel::None)
    }

    pub fn set_escalation(&mut self, level: EscalationLevel) {
        self.escalation_level = level as i32;
    }

    pub fn outstanding(&self) -> BigDecimal {
        &self.total - &self.amount_paid
    }

    /// Whole days past due, rounded up, never negative.
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        let seconds = (now - self.due_date).num_seconds();
        if seconds <= 0 {
            return 0;
        }
        (seconds + 86_399) / 86_400
    }

    /// The delinquency state a follow-up leaves the invoice in: past-due
    /// invoices land on OVERDUE regardless of their prior state.
    pub fn determine_status(&self, now: DateTime<Utc>) -> InvoiceStatus {
        if now > self.due_date {
            InvoiceStatus::Overdue
        } else {
            InvoiceStatus::Sent
        }
    }
}

#[derive(
    Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset, Identifiable,
)]
#[diesel(table_name = collection_actions)]
pub struct CollectionAction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub run_id: Option<Uuid>,
    pub action_type: String,
    pub channel: String,
    pub status: String,
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub recipient: Option<String>,
    pub reasoning: String,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable)]
#[diesel(table_name = payment_plans)]
pub struct PaymentPlan {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub total_amount: BigDecimal,
    pub installment_count: i32,
    pub installment_amount: BigDecimal,
    pub start_date: DateTime<Utc>,
    pub next_due_date: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset, Identifiable,
)]
#[diesel(table_name = execution_logs)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub invoices_processed: i32,
    pub actions_created: i32,
    pub emails_sent: i32,
    pub errors: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl ExecutionLog {
    pub fn started(tenant_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            status: RunStatus::Running.as_str().to_string(),
            invoices_processed: 0,
            actions_created: 0,
            emails_sent: 0,
            errors: 0,
            started_at,
            finished_at: None,
            duration_ms: None,
            summary: None,
            error: None,
        }
    }
}

/// Aggregated payment behavior of one client, derived from their invoice
/// history. Lives only in the reliability cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientHistoryProfile {
    pub total_invoices: i64,
    pub total_paid: i64,
    pub paid_on_time: i64,
    pub avg_days_to_payment: f64,
    pub reliability_score: f64,
    pub overdue_count: i64,
    pub overdue_amount: f64,
}

impl ClientHistoryProfile {
    /// Profile used when a client has no usable identity or no history at
    /// all: full score so the decision is driven by the invoice itself.
    pub fn neutral() -> Self {
        Self {
            total_invoices: 0,
            total_paid: 0,
            paid_on_time: 0,
            avg_days_to_payment: 0.0,
            reliability_score: 1.0,
            overdue_count: 0,
            overdue_amount: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn escalation_levels_are_ordered() {
        assert!(EscalationLevel::None < EscalationLevel::FriendlyReminder);
        assert!(EscalationLevel::FinalNotice < EscalationLevel::LegalWarning);
        assert_eq!(EscalationLevel::from_i32(3), Some(EscalationLevel::UrgentNotice));
        assert_eq!(EscalationLevel::from_i32(42), None);
        assert_eq!(EscalationLevel::LegalWarning.next(), EscalationLevel::LegalWarning);
    }

    #[test]
    fn invoice_status_round_trips() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Sent,
            InvoiceStatus::Overdue,
            InvoiceStatus::Partial,
            InvoiceStatus::Paid,
            InvoiceStatus::Disputed,
            InvoiceStatus::Cancelled,
        ] {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
        assert!(InvoiceStatus::Partial.is_active());
        assert!(!InvoiceStatus::Paid.is_active());
    }

    #[test]
    fn days_overdue_rounds_up_and_clamps() {
        let due = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut invoice = crate::collector::testing::fixture_invoice(Uuid::new_v4(), "INV-1");
        invoice.due_date = due;

        // an hour past due already counts as one day
        assert_eq!(invoice.days_overdue(due + chrono::Duration::hours(1)), 1);
        assert_eq!(invoice.days_overdue(due + chrono::Duration::days(5)), 5);
        assert_eq!(
            invoice.days_overdue(due + chrono::Duration::days(5) + chrono::Duration::minutes(1)),
            6
        );
        // not yet due
        assert_eq!(invoice.days_overdue(due - chrono::Duration::days(2)), 0);
    }

    #[test]
    fn determine_status_is_deterministic_for_past_due() {
        let due = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut invoice = crate::collector::testing::fixture_invoice(Uuid::new_v4(), "INV-2");
        invoice.due_date = due;
        for prior in ["SENT", "PARTIAL", "DISPUTED"] {
            invoice.status = prior.to_string();
            assert_eq!(
                invoice.determine_status(due + chrono::Duration::days(40)),
                InvoiceStatus::Overdue
            );
        }
        assert_eq!(
            invoice.determine_status(due - chrono::Duration::days(1)),
            InvoiceStatus::Sent
        );
    }
}
