use std::sync::Arc;

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Duration, Months, Utc};
use log::warn;
use uuid::Uuid;

use super::{CollectionDecision, CollectorError, DecisionAction};
use crate::email::{EmailMessage, NotificationChannel};
use crate::repository::LedgerRepository;
use crate::shared::models::{ActionStatus, CollectionAction, Invoice, InvoiceStatus, PaymentPlan};

pub const INSTALLMENT_COUNT: i32 = 4;
/// Days until an invoice becomes actionable again after a follow-up.
pub const FOLLOW_UP_INTERVAL_DAYS: i64 = 3;
const DEFAULT_WAIT_DAYS: i64 = 3;

/// Stat deltas produced by executing one decision; the orchestrator folds
/// these into its running totals.
#[derive(Debug, Clone, Default)]
pub struct ActionStats {
    pub actions_created: u32,
    pub emails_sent: u32,
    pub errors: u32,
    /// Human-readable failure lines, already tagged with the invoice number.
    pub failures: Vec<String>,
}

pub fn installment_amount(total: &BigDecimal) -> BigDecimal {
    (total / BigDecimal::from(INSTALLMENT_COUNT)).with_scale_round(2, RoundingMode::HalfUp)
}

/// One calendar month out, clamped to the last day of shorter months.
pub fn plan_next_due(start: DateTime<Utc>) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(1))
        .unwrap_or(start + Duration::days(30))
}

/// Dispatches a validated decision to its concrete effect. Every branch
/// writes its own audit record; notification failures and missing client
/// emails are recorded and counted, never thrown.
pub struct ActionExecutor {
    repository: Arc<dyn LedgerRepository>,
    channel: Arc<dyn NotificationChannel>,
}

impl ActionExecutor {
    pub fn new(
        repository: Arc<dyn LedgerRepository>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            repository,
            channel,
        }
    }

    pub async fn execute(
        &self,
        invoice: &mut Invoice,
        decision: &CollectionDecision,
        run_id: Uuid,
    ) -> Result<ActionStats, CollectorError> {
        match decision.action {
            DecisionAction::SendReminder | DecisionAction::Escalate => {
                self.send_follow_up(invoice, decision, run_id).await
            }
            DecisionAction::OfferPaymentPlan => {
                self.offer_payment_plan(invoice, decision, run_id).await
            }
            DecisionAction::Wait => self.reschedule(invoice, decision, run_id).await,
            DecisionAction::ManualReview => self.flag_for_review(invoice, decision, run_id).await,
        }
    }

    fn new_action(
        invoice: &Invoice,
        decision: &CollectionDecision,
        run_id: Uuid,
        channel: &str,
        status: ActionStatus,
    ) -> CollectionAction {
        CollectionAction {
            id: Uuid::new_v4(),
            tenant_id: invoice.tenant_id,
            invoice_id: invoice.id,
            run_id: Some(run_id),
            action_type: decision.action.as_str().to_string(),
            channel: channel.to_string(),
            status: status.as_str().to_string(),
            email_subject: decision.email_subject.clone(),
            email_body: decision.email_body.clone(),
            recipient: None,
            reasoning: decision.reasoning.clone(),
            error: None,
            metadata: serde_json::json!({}),
            scheduled_for: None,
            sent_at: None,
            executed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Records the no-recipient case as a failed action without touching the
    /// channel or the invoice.
    async fn record_missing_email(
        &self,
        invoice: &Invoice,
        decision: &CollectionDecision,
        run_id: Uuid,
    ) -> Result<ActionStats, CollectorError> {
        warn!(
            "Invoice {} has no client email; {} not sent",
            invoice.invoice_number,
            decision.action.as_str()
        );
        let mut action = Self::new_action(invoice, decision, run_id, "email", ActionStatus::Failed);
        action.error = Some("client has no email address".to_string());
        action.executed_at = Some(Utc::now());
        self.repository.insert_action(&action).await?;

        Ok(ActionStats {
            actions_created: 1,
            emails_sent: 0,
            errors: 1,
            failures: vec![format!(
                "{}: client has no email address",
                invoice.invoice_number
            )],
        })
    }

    async fn deliver(
        &self,
        invoice: &Invoice,
        action: &mut CollectionAction,
        recipient: &str,
        stats: &mut ActionStats,
    ) -> Result<(), CollectorError> {
        let outcome = self
            .channel
            .send(&EmailMessage {
                to: recipient.to_string(),
                subject: action.email_subject.clone().unwrap_or_default(),
                body: action.email_body.clone().unwrap_or_default(),
            })
            .await;

        let now = Utc::now();
        action.executed_at = Some(now);
        if outcome.success {
            action.status = ActionStatus::Completed.as_str().to_string();
            action.sent_at = Some(now);
            stats.emails_sent += 1;
        } else {
            let error = outcome
                .error
                .unwrap_or_else(|| "notification channel failure".to_string());
            action.status = ActionStatus::Failed.as_str().to_string();
            action.error = Some(error.clone());
            stats.errors += 1;
            stats
                .failures
                .push(format!("{}: email delivery failed: {error}", invoice.invoice_number));
        }
        self.repository.update_action(action).await?;
        Ok(())
    }

    async fn send_follow_up(
        &self,
        invoice: &mut Invoice,
        decision: &CollectionDecision,
        run_id: Uuid,
    ) -> Result<ActionStats, CollectorError> {
        let Some(recipient) = invoice
            .client_email
            .clone()
            .filter(|e| !e.trim().is_empty())
        else {
            return self.record_missing_email(invoice, decision, run_id).await;
        };

        let level = match decision.action {
            DecisionAction::Escalate => decision
                .escalation_level
                .unwrap_or_else(|| invoice.escalation().next()),
            _ => decision.escalation_level.unwrap_or_else(|| invoice.escalation()),
        };

        let mut stats = ActionStats::default();
        let mut action =
            Self::new_action(invoice, decision, run_id, "email", ActionStatus::Pending);
        action.recipient = Some(recipient.clone());
        self.repository.insert_action(&action).await?;
        stats.actions_created += 1;

        self.deliver(invoice, &mut action, &recipient, &mut stats)
            .await?;

        // The follow-up was attempted either way; the invoice advances.
        let now = Utc::now();
        invoice.last_follow_up_at = Some(now);
        invoice.follow_up_count += 1;
        invoice.set_escalation(level);
        invoice.next_action_date = Some(now + Duration::days(FOLLOW_UP_INTERVAL_DAYS));
        invoice.agent_notes = Some(decision.reasoning.clone());
        let status = invoice.determine_status(now);
        invoice.set_status(status);
        invoice.updated_at = now;
        self.repository.update_invoice(invoice).await?;

        Ok(stats)
    }

    async fn offer_payment_plan(
        &self,
        invoice: &mut Invoice,
        decision: &CollectionDecision,
        run_id: Uuid,
    ) -> Result<ActionStats, CollectorError> {
        let Some(recipient) = invoice
            .client_email
            .clone()
            .filter(|e| !e.trim().is_empty())
        else {
            return self.record_missing_email(invoice, decision, run_id).await;
        };

        let now = Utc::now();
        let plan = PaymentPlan {
            id: Uuid::new_v4(),
            tenant_id: invoice.tenant_id,
            invoice_id: invoice.id,
            total_amount: invoice.total.clone(),
            installment_count: INSTALLMENT_COUNT,
            installment_amount: installment_amount(&invoice.total),
            start_date: now,
            next_due_date: plan_next_due(now),
            status: "PROPOSED".to_string(),
            created_at: now,
        };
        self.repository.insert_payment_plan(&plan).await?;

        let mut stats = ActionStats::default();
        let mut action =
            Self::new_action(invoice, decision, run_id, "email", ActionStatus::Pending);
        action.recipient = Some(recipient.clone());
        action.email_body = Some(format!(
            "{}{}",
            decision.email_body.clone().unwrap_or_default(),
            plan_summary_html(&plan, invoice)
        ));
        action.metadata = serde_json::json!({ "payment_plan_id": plan.id });
        self.repository.insert_action(&action).await?;
        stats.actions_created += 1;

        self.deliver(invoice, &mut action, &recipient, &mut stats)
            .await?;

        // A payment plan is an alternative to escalation, not a step of it:
        // the level stays put.
        let now = Utc::now();
        invoice.last_follow_up_at = Some(now);
        invoice.follow_up_count += 1;
        invoice.next_action_date = Some(now + Duration::days(FOLLOW_UP_INTERVAL_DAYS));
        invoice.agent_notes = Some(decision.reasoning.clone());
        invoice.updated_at = now;
        self.repository.update_invoice(invoice).await?;

        Ok(stats)
    }

    async fn reschedule(
        &self,
        invoice: &mut Invoice,
        decision: &CollectionDecision,
        run_id: Uuid,
    ) -> Result<ActionStats, CollectorError> {
        let now = Utc::now();
        let wait_days = decision.wait_days.unwrap_or(DEFAULT_WAIT_DAYS).max(1);
        let next_action = now + Duration::days(wait_days);

        let mut action =
            Self::new_action(invoice, decision, run_id, "none", ActionStatus::Scheduled);
        action.scheduled_for = Some(next_action);
        action.executed_at = Some(now);
        self.repository.insert_action(&action).await?;

        invoice.next_action_date = Some(next_action);
        invoice.updated_at = now;
        self.repository.update_invoice(invoice).await?;

        Ok(ActionStats {
            actions_created: 1,
            ..Default::default()
        })
    }

    async fn flag_for_review(
        &self,
        invoice: &mut Invoice,
        decision: &CollectionDecision,
        run_id: Uuid,
    ) -> Result<ActionStats, CollectorError> {
        let now = Utc::now();
        let mut action =
            Self::new_action(invoice, decision, run_id, "none", ActionStatus::Completed);
        action.executed_at = Some(now);
        self.repository.insert_action(&action).await?;

        invoice.set_status(InvoiceStatus::Disputed);
        invoice.agent_notes = Some(format!("FLAGGED FOR REVIEW: {}", decision.reasoning));
        invoice.updated_at = now;
        self.repository.update_invoice(invoice).await?;

        Ok(ActionStats {
            actions_created: 1,
            ..Default::default()
        })
    }
}

fn plan_summary_html(plan: &PaymentPlan, invoice: &Invoice) -> String {
    format!(
        "<hr/><p><strong>Proposed payment plan</strong></p>\
         <ul><li>{} installments of {} {}</li>\
         <li>First installment due {}</li></ul>",
        plan.installment_count,
        plan.installment_amount,
        invoice.currency,
        plan.next_due_date.format("%Y-%m-%d"),
    )
}

#[cfg(test)]
mod tests {
    use super::super::testing::{
        fixture_invoice, MemoryLedger, RecordingChannel,
    };
    use super::*;
    use crate::shared::models::EscalationLevel;
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn executor(
        ledger: Arc<MemoryLedger>,
        channel: Arc<RecordingChannel>,
    ) -> ActionExecutor {
        ActionExecutor::new(ledger, channel)
    }

    fn reminder_decision(level: EscalationLevel) -> CollectionDecision {
        CollectionDecision {
            action: DecisionAction::SendReminder,
            reasoning: "past due, reliable payer".to_string(),
            escalation_level: Some(level),
            email_subject: Some("Payment reminder".to_string()),
            email_body: Some("<p>Please settle your invoice.</p>".to_string()),
            wait_days: None,
        }
    }

    #[test]
    fn installments_split_the_total_exactly() {
        let amount = installment_amount(&BigDecimal::from_str("1000.00").unwrap());
        assert_eq!(amount, BigDecimal::from_str("250.00").unwrap());

        let amount = installment_amount(&BigDecimal::from_str("1001.50").unwrap());
        assert_eq!(amount, BigDecimal::from_str("250.38").unwrap());
    }

    #[test]
    fn plan_next_due_is_one_calendar_month_out() {
        // plain month
        let start = Utc.with_ymd_and_hms(2025, 4, 15, 9, 0, 0).unwrap();
        assert_eq!(
            plan_next_due(start),
            Utc.with_ymd_and_hms(2025, 5, 15, 9, 0, 0).unwrap()
        );

        // 31-day month into a 30-day month clamps to the 30th
        let start = Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap();
        assert_eq!(
            plan_next_due(start),
            Utc.with_ymd_and_hms(2025, 4, 30, 12, 0, 0).unwrap()
        );

        // January 31st into February clamps to the 28th
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            plan_next_due(start),
            Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap()
        );

        // leap year February
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            plan_next_due(start),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn reminder_updates_invoice_and_completes_action() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let channel = Arc::new(RecordingChannel::default());
        let executor = executor(ledger.clone(), channel.clone());

        // total 1000, due 5 days ago, no prior actions
        let mut invoice = fixture_invoice(tenant, "INV-A1");
        let decision = reminder_decision(EscalationLevel::FirmReminder);

        let stats = executor
            .execute(&mut invoice, &decision, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(stats.actions_created, 1);
        assert_eq!(stats.emails_sent, 1);
        assert_eq!(stats.errors, 0);

        let actions = ledger.actions.read().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, "COMPLETED");
        assert!(actions[0].sent_at.is_some());

        assert_eq!(invoice.follow_up_count, 1);
        assert_eq!(invoice.escalation(), EscalationLevel::FirmReminder);
        assert_eq!(invoice.status(), InvoiceStatus::Overdue);
        assert!(invoice.next_action_date.is_some());
        assert_eq!(channel.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn reminder_forces_overdue_status_regardless_of_prior_status() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let channel = Arc::new(RecordingChannel::default());
        let executor = executor(ledger, channel);

        let mut invoice = fixture_invoice(tenant, "INV-B1");
        invoice.due_date = Utc::now() - Duration::days(40);
        invoice.status = "PARTIAL".to_string();

        let decision = reminder_decision(EscalationLevel::LegalWarning);
        executor
            .execute(&mut invoice, &decision, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::Overdue);
        assert_eq!(invoice.escalation(), EscalationLevel::LegalWarning);
    }

    #[tokio::test]
    async fn missing_email_is_an_error_not_a_panic() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let channel = Arc::new(RecordingChannel::default());
        let executor = executor(ledger.clone(), channel.clone());

        let mut invoice = fixture_invoice(tenant, "INV-C1");
        invoice.client_email = None;
        let before_follow_ups = invoice.follow_up_count;

        let decision = reminder_decision(EscalationLevel::FriendlyReminder);
        let stats = executor
            .execute(&mut invoice, &decision, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(stats.errors, 1);
        assert!(channel.sent.lock().await.is_empty());
        assert_eq!(invoice.follow_up_count, before_follow_ups);

        let actions = ledger.actions.read().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, "FAILED");
        assert!(actions[0].error.as_deref().unwrap().contains("no email"));
    }

    #[tokio::test]
    async fn delivery_failure_still_advances_the_invoice() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let channel = RecordingChannel::failing("mailbox unavailable");
        let executor = executor(ledger.clone(), channel);

        let mut invoice = fixture_invoice(tenant, "INV-D1");
        let decision = reminder_decision(EscalationLevel::FriendlyReminder);
        let stats = executor
            .execute(&mut invoice, &decision, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.emails_sent, 0);
        assert_eq!(invoice.follow_up_count, 1);

        let actions = ledger.actions.read().await;
        assert_eq!(actions[0].status, "FAILED");
        assert!(actions[0]
            .error
            .as_deref()
            .unwrap()
            .contains("mailbox unavailable"));
    }

    #[tokio::test]
    async fn payment_plan_creates_plan_and_keeps_escalation() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let channel = Arc::new(RecordingChannel::default());
        let executor = executor(ledger.clone(), channel.clone());

        let mut invoice = fixture_invoice(tenant, "INV-E1");
        invoice.set_escalation(EscalationLevel::UrgentNotice);

        let decision = CollectionDecision {
            action: DecisionAction::OfferPaymentPlan,
            reasoning: "large balance, cooperative client".to_string(),
            escalation_level: None,
            email_subject: Some("A payment plan for your balance".to_string()),
            email_body: Some("<p>We can split this up.</p>".to_string()),
            wait_days: None,
        };
        let stats = executor
            .execute(&mut invoice, &decision, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(stats.actions_created, 1);
        assert_eq!(stats.emails_sent, 1);

        let plans = ledger.plans.read().await;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].installment_count, 4);
        assert_eq!(
            plans[0].installment_amount,
            BigDecimal::from_str("250.00").unwrap()
        );
        assert_eq!(plans[0].status, "PROPOSED");

        let actions = ledger.actions.read().await;
        assert_eq!(
            actions[0].metadata["payment_plan_id"],
            serde_json::json!(plans[0].id)
        );
        // summary block was appended to the body that went out
        let sent = channel.sent.lock().await;
        assert!(sent[0].body.contains("Proposed payment plan"));

        assert_eq!(invoice.escalation(), EscalationLevel::UrgentNotice);
        assert_eq!(invoice.follow_up_count, 1);
    }

    #[tokio::test]
    async fn wait_schedules_without_sending() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let channel = Arc::new(RecordingChannel::default());
        let executor = executor(ledger.clone(), channel.clone());

        let mut invoice = fixture_invoice(tenant, "INV-F1");
        let decision = CollectionDecision {
            action: DecisionAction::Wait,
            reasoning: "payment is reportedly in flight".to_string(),
            escalation_level: None,
            email_subject: None,
            email_body: None,
            wait_days: Some(5),
        };
        let before = Utc::now();
        let stats = executor
            .execute(&mut invoice, &decision, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(stats.actions_created, 1);
        assert_eq!(stats.emails_sent, 0);
        assert!(channel.sent.lock().await.is_empty());

        let next = invoice.next_action_date.unwrap();
        assert!(next >= before + Duration::days(5) - Duration::seconds(5));

        let actions = ledger.actions.read().await;
        assert_eq!(actions[0].status, "SCHEDULED");
        assert_eq!(actions[0].channel, "none");
        assert!(actions[0].scheduled_for.is_some());
    }

    #[tokio::test]
    async fn manual_review_disputes_the_invoice() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let channel = Arc::new(RecordingChannel::default());
        let executor = executor(ledger.clone(), channel.clone());

        let mut invoice = fixture_invoice(tenant, "INV-G1");
        let decision = CollectionDecision {
            action: DecisionAction::ManualReview,
            reasoning: "client disputes the line items".to_string(),
            escalation_level: None,
            email_subject: None,
            email_body: None,
            wait_days: None,
        };
        let stats = executor
            .execute(&mut invoice, &decision, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(stats.actions_created, 1);
        assert!(channel.sent.lock().await.is_empty());
        assert_eq!(invoice.status(), InvoiceStatus::Disputed);
        assert!(invoice
            .agent_notes
            .as_deref()
            .unwrap()
            .starts_with("FLAGGED FOR REVIEW"));

        let actions = ledger.actions.read().await;
        assert_eq!(actions[0].status, "COMPLETED");
    }
}
