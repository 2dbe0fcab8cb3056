//! In-memory collaborator fakes for exercising the collection engine
//! without Postgres, Redis, SMTP or an LLM endpoint.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::cache::{CacheError, ReliabilityCache};
use crate::email::{EmailMessage, NotificationChannel, SendOutcome};
use crate::llm::LlmProvider;
use crate::repository::{LedgerRepository, RepositoryError, ACTIVE_STATUSES};
use crate::shared::models::{CollectionAction, ExecutionLog, Invoice, PaymentPlan};

/// An overdue-but-untouched invoice: 1000.00 USD, due five days ago, never
/// followed up. Tests override the fields they care about.
pub fn fixture_invoice(tenant_id: Uuid, number: &str) -> Invoice {
    let now = Utc::now();
    Invoice {
        id: Uuid::new_v4(),
        tenant_id,
        invoice_number: number.to_string(),
        client_name: "Acme Ltd".to_string(),
        client_email: Some("billing@acme.test".to_string()),
        total: BigDecimal::from_str("1000.00").expect("literal"),
        amount_paid: BigDecimal::from(0),
        currency: "USD".to_string(),
        issue_date: now - Duration::days(35),
        due_date: now - Duration::days(5),
        status: "OVERDUE".to_string(),
        escalation_level: 0,
        follow_up_count: 0,
        last_follow_up_at: None,
        next_action_date: None,
        agent_notes: None,
        created_at: now - Duration::days(35),
        updated_at: now - Duration::days(6),
    }
}

/// A well-formed SEND_REMINDER decision at the given level, as the provider
/// would emit it.
pub fn reminder_decision_json(level: &str) -> String {
    format!(
        r#"{{"action":"SEND_REMINDER","reasoning":"past due","escalationLevel":"{level}","emailSubject":"Payment reminder","emailBody":"<p>Please pay.</p>"}}"#
    )
}

#[derive(Default)]
pub struct MemoryLedger {
    pub invoices: RwLock<Vec<Invoice>>,
    pub actions: RwLock<Vec<CollectionAction>>,
    pub plans: RwLock<Vec<PaymentPlan>>,
    pub logs: RwLock<Vec<ExecutionLog>>,
    /// Number of client-history aggregation queries served.
    pub history_queries: AtomicUsize,
    /// Invoice ids whose update should fail, for batch-isolation tests.
    pub fail_invoice_updates: RwLock<HashSet<Uuid>>,
    /// Makes the eligibility load itself fail, the run's only fatal path.
    pub fail_eligible_load: AtomicBool,
}

fn injected(what: &str) -> RepositoryError {
    RepositoryError::Pool(format!("injected {what} failure"))
}

#[async_trait]
impl LedgerRepository for MemoryLedger {
    async fn eligible_invoices(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        if self.fail_eligible_load.load(Ordering::SeqCst) {
            return Err(injected("eligible-invoice load"));
        }
        let mut rows: Vec<Invoice> = self
            .invoices
            .read()
            .await
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .filter(|i| ACTIVE_STATUSES.contains(&i.status.as_str()))
            .filter(|i| {
                (i.follow_up_count == 0 && i.due_date < now)
                    || i.last_follow_up_at.is_some_and(|t| t < stale_before)
                    || i.next_action_date.is_some_and(|t| t <= now)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.due_date);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn client_invoices(
        &self,
        tenant_id: Uuid,
        client_email: &str,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        self.history_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .invoices
            .read()
            .await
            .iter()
            .filter(|i| {
                i.tenant_id == tenant_id && i.client_email.as_deref() == Some(client_email)
            })
            .cloned()
            .collect())
    }

    async fn recent_actions(
        &self,
        invoice_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CollectionAction>, RepositoryError> {
        let mut rows: Vec<CollectionAction> = self
            .actions
            .read()
            .await
            .iter()
            .filter(|a| a.invoice_id == invoice_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn insert_action(&self, action: &CollectionAction) -> Result<(), RepositoryError> {
        self.actions.write().await.push(action.clone());
        Ok(())
    }

    async fn update_action(&self, action: &CollectionAction) -> Result<(), RepositoryError> {
        let mut actions = self.actions.write().await;
        if let Some(existing) = actions.iter_mut().find(|a| a.id == action.id) {
            *existing = action.clone();
        }
        Ok(())
    }

    async fn insert_payment_plan(&self, plan: &PaymentPlan) -> Result<(), RepositoryError> {
        self.plans.write().await.push(plan.clone());
        Ok(())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        if self.fail_invoice_updates.read().await.contains(&invoice.id) {
            return Err(injected("invoice update"));
        }
        let mut invoices = self.invoices.write().await;
        if let Some(existing) = invoices.iter_mut().find(|i| i.id == invoice.id) {
            *existing = invoice.clone();
        }
        Ok(())
    }

    async fn insert_execution_log(&self, log: &ExecutionLog) -> Result<(), RepositoryError> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    async fn update_execution_log(&self, log: &ExecutionLog) -> Result<(), RepositoryError> {
        let mut logs = self.logs.write().await;
        if let Some(existing) = logs.iter_mut().find(|l| l.id == log.id) {
            *existing = log.clone();
        }
        Ok(())
    }

    async fn execution_logs(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>, RepositoryError> {
        let mut rows: Vec<ExecutionLog> = self
            .logs
            .read()
            .await
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by_key(|l| std::cmp::Reverse(l.started_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn execution_log(&self, run_id: Uuid) -> Result<Option<ExecutionLog>, RepositoryError> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .find(|l| l.id == run_id)
            .cloned())
    }

    async fn tenants_with_open_invoices(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let mut tenants: Vec<Uuid> = self
            .invoices
            .read()
            .await
            .iter()
            .filter(|i| ACTIVE_STATUSES.contains(&i.status.as_str()))
            .map(|i| i.tenant_id)
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}

#[derive(Default)]
pub struct MemoryReliabilityCache {
    pub entries: RwLock<std::collections::HashMap<String, String>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl ReliabilityCache for MemoryReliabilityCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected read failure".to_string()));
        }
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl_seconds: u64) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected write failure".to_string()));
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Replays canned provider responses in order; `Err` entries simulate
/// network failures.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _config: &Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        match self.responses.lock().await.pop_front() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(e)) => Err(e.into()),
            None => Err("no scripted response left".into()),
        }
    }
}

/// Captures every outgoing message; optionally fails each send.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<EmailMessage>>,
    fail_with: Option<String>,
}

impl RecordingChannel {
    pub fn failing(error: &str) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Some(error.to_string()),
        })
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, message: &EmailMessage) -> SendOutcome {
        self.sent.lock().await.push(message.clone());
        match &self.fail_with {
            Some(error) => SendOutcome::failed(error.clone()),
            None => SendOutcome::ok(),
        }
    }
}
