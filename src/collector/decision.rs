use std::sync::Arc;

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::llm::LlmProvider;
use crate::shared::models::{
    ClientHistoryProfile, CollectionAction, EscalationLevel, Invoice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    SendReminder,
    OfferPaymentPlan,
    Escalate,
    Wait,
    ManualReview,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendReminder => "SEND_REMINDER",
            Self::OfferPaymentPlan => "OFFER_PAYMENT_PLAN",
            Self::Escalate => "ESCALATE",
            Self::Wait => "WAIT",
            Self::ManualReview => "MANUAL_REVIEW",
        }
    }

    /// Actions whose execution renders and delivers an email.
    pub fn sends_email(&self) -> bool {
        matches!(
            self,
            Self::SendReminder | Self::OfferPaymentPlan | Self::Escalate
        )
    }
}

/// What the provider is asked to produce: strict JSON with camelCase keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDecision {
    pub action: DecisionAction,
    pub reasoning: String,
    #[serde(default)]
    pub escalation_level: Option<EscalationLevel>,
    #[serde(default)]
    pub email_subject: Option<String>,
    #[serde(default)]
    pub email_body: Option<String>,
    #[serde(default)]
    pub wait_days: Option<i64>,
}

/// Wraps the LLM provider with prompt construction, output validation and a
/// deterministic fallback. `decide` never fails: any provider or parse
/// problem collapses into a MANUAL_REVIEW decision that keeps the run alive.
pub struct DecisionEngine {
    provider: Arc<dyn LlmProvider>,
}

impl DecisionEngine {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub async fn decide(
        &self,
        invoice: &Invoice,
        history: &ClientHistoryProfile,
        prior_actions: &[CollectionAction],
    ) -> CollectionDecision {
        let prompt = build_prompt(invoice, history, prior_actions);
        let config = serde_json::json!({
            "temperature": 0.2,
            "max_tokens": 700
        });

        let raw = match self.provider.generate(&prompt, &config).await {
            Ok(raw) => raw,
            Err(e) => {
                return fallback_decision(
                    invoice,
                    format!("Decision provider call failed: {e}"),
                )
            }
        };

        match parse_decision(&raw) {
            Ok(decision) => {
                if let Some(level) = decision.escalation_level {
                    if level < invoice.escalation() {
                        warn!(
                            "Invoice {}: decision lowers escalation from {} to {}",
                            invoice.invoice_number,
                            invoice.escalation().as_str(),
                            level.as_str()
                        );
                    }
                }
                decision
            }
            Err(reason) => fallback_decision(invoice, reason),
        }
    }
}

/// The deterministic recovery path: flag for a human, carry the error as the
/// reasoning, leave the escalation level where it is.
fn fallback_decision(invoice: &Invoice, reason: String) -> CollectionDecision {
    let reasoning = if reason.trim().is_empty() {
        "Decision provider returned no usable output".to_string()
    } else {
        reason
    };
    CollectionDecision {
        action: DecisionAction::ManualReview,
        reasoning,
        escalation_level: Some(invoice.escalation()),
        email_subject: None,
        email_body: None,
        wait_days: None,
    }
}

fn build_prompt(
    invoice: &Invoice,
    history: &ClientHistoryProfile,
    prior_actions: &[CollectionAction],
) -> String {
    let now = Utc::now();
    let email = invoice.client_email.as_deref().unwrap_or("no email on file");

    let prior = if prior_actions.is_empty() {
        "  none".to_string()
    } else {
        prior_actions
            .iter()
            .map(|a| {
                format!(
                    "  - {} {} ({})",
                    a.created_at.format("%Y-%m-%d"),
                    a.action_type,
                    a.status
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are the automated collections assistant of an accounting platform.
Decide the next collection step for the invoice below.

Invoice {number} for {client} <{email}>
  Total: {total} {currency}, paid to date: {paid}, outstanding: {outstanding}
  Issued {issued}, due {due} ({days} day(s) overdue)
  Status: {status}, escalation level: {level}, follow-ups so far: {follow_ups}

Client payment history:
  {hist_total} invoice(s), {hist_paid} paid, {hist_on_time} on time
  Average days to payment: {avg:.1}
  Reliability score: {score:.2}
  Currently overdue: {od_count} invoice(s) totalling {od_amount:.2}

Previous collection actions:
{prior}

Escalation guideline by days overdue: 1-3 FRIENDLY_REMINDER, 4-7 FIRM_REMINDER,
8-14 URGENT_NOTICE, 15-30 FINAL_NOTICE, over 30 LEGAL_WARNING. Treat reliable
clients (score above 0.8) one step softer and chronically late clients one
step harder.

Respond with a single JSON object and nothing else:
{{"action":"SEND_REMINDER|OFFER_PAYMENT_PLAN|ESCALATE|WAIT|MANUAL_REVIEW",
 "reasoning":"why this step",
 "escalationLevel":"FRIENDLY_REMINDER",
 "emailSubject":"subject line",
 "emailBody":"<p>HTML body</p>",
 "waitDays":3}}
emailSubject and emailBody are required for SEND_REMINDER, ESCALATE and
OFFER_PAYMENT_PLAN. waitDays applies to WAIT only."#,
        number = invoice.invoice_number,
        client = invoice.client_name,
        email = email,
        total = invoice.total,
        currency = invoice.currency,
        paid = invoice.amount_paid,
        outstanding = invoice.outstanding(),
        issued = invoice.issue_date.format("%Y-%m-%d"),
        due = invoice.due_date.format("%Y-%m-%d"),
        days = invoice.days_overdue(now),
        status = invoice.status,
        level = invoice.escalation().as_str(),
        follow_ups = invoice.follow_up_count,
        hist_total = history.total_invoices,
        hist_paid = history.total_paid,
        hist_on_time = history.paid_on_time,
        avg = history.avg_days_to_payment,
        score = history.reliability_score,
        od_count = history.overdue_count,
        od_amount = history.overdue_amount,
        prior = prior,
    )
}

/// Providers love wrapping JSON in markdown fences; tolerate that, nothing
/// else.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn parse_decision(raw: &str) -> Result<CollectionDecision, String> {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err("Decision provider returned an empty response".to_string());
    }

    let decision: CollectionDecision = serde_json::from_str(cleaned)
        .map_err(|e| format!("Unparseable decision output: {e}"))?;

    if decision.reasoning.trim().is_empty() {
        return Err("Decision is missing its reasoning".to_string());
    }

    if decision.action.sends_email() {
        let has_subject = decision
            .email_subject
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        let has_body = decision
            .email_body
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if !has_subject || !has_body {
            return Err(format!(
                "{} decision is missing its email subject or body",
                decision.action.as_str()
            ));
        }
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fixture_invoice, ScriptedProvider};
    use super::*;
    use uuid::Uuid;

    fn engine(responses: Vec<Result<String, String>>) -> DecisionEngine {
        DecisionEngine::new(Arc::new(ScriptedProvider::new(responses)))
    }

    fn overdue_invoice() -> Invoice {
        let mut invoice = fixture_invoice(Uuid::new_v4(), "INV-100");
        invoice.escalation_level = EscalationLevel::UrgentNotice as i32;
        invoice
    }

    #[tokio::test]
    async fn valid_json_is_accepted() {
        let engine = engine(vec![Ok(r#"{
            "action": "SEND_REMINDER",
            "reasoning": "5 days overdue, reliable client",
            "escalationLevel": "FIRM_REMINDER",
            "emailSubject": "Payment reminder",
            "emailBody": "<p>Please pay.</p>"
        }"#
        .to_string())]);
        let invoice = overdue_invoice();
        let decision = engine
            .decide(&invoice, &ClientHistoryProfile::neutral(), &[])
            .await;
        assert_eq!(decision.action, DecisionAction::SendReminder);
        assert_eq!(decision.escalation_level, Some(EscalationLevel::FirmReminder));
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let engine = engine(vec![Ok(
            "```json\n{\"action\":\"WAIT\",\"reasoning\":\"give them a week\",\"waitDays\":7}\n```"
                .to_string(),
        )]);
        let invoice = overdue_invoice();
        let decision = engine
            .decide(&invoice, &ClientHistoryProfile::neutral(), &[])
            .await;
        assert_eq!(decision.action, DecisionAction::Wait);
        assert_eq!(decision.wait_days, Some(7));
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_manual_review() {
        let engine = engine(vec![Err("504 gateway timeout".to_string())]);
        let invoice = overdue_invoice();
        let decision = engine
            .decide(&invoice, &ClientHistoryProfile::neutral(), &[])
            .await;
        assert_eq!(decision.action, DecisionAction::ManualReview);
        assert!(decision.reasoning.contains("504"));
        // the invoice's current level is preserved
        assert_eq!(decision.escalation_level, Some(EscalationLevel::UrgentNotice));
    }

    #[tokio::test]
    async fn malformed_outputs_fall_back_deterministically() {
        for bad in [
            "",
            "   ",
            "I think you should remind them politely.",
            r#"{"action":"NUKE_FROM_ORBIT","reasoning":"x"}"#,
            r#"{"action":"SEND_REMINDER","reasoning":""}"#,
            // send-class decision without email copy
            r#"{"action":"ESCALATE","reasoning":"overdue"}"#,
        ] {
            let engine = engine(vec![Ok(bad.to_string())]);
            let invoice = overdue_invoice();
            let decision = engine
                .decide(&invoice, &ClientHistoryProfile::neutral(), &[])
                .await;
            assert_eq!(decision.action, DecisionAction::ManualReview, "input: {bad:?}");
            assert!(!decision.reasoning.trim().is_empty());
            assert_eq!(
                decision.escalation_level,
                Some(EscalationLevel::UrgentNotice)
            );
        }
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {} "), "{}");
    }
}
