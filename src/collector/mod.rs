use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::ReliabilityCache;
use crate::email::NotificationChannel;
use crate::llm::LlmProvider;
use crate::repository::{LedgerRepository, RepositoryError};
use crate::shared::models::{
    ClientHistoryProfile, ExecutionLog, Invoice, RunStatus,
};

pub mod decision;
pub mod executor;
pub mod history;
pub mod testing;

pub use decision::{CollectionDecision, DecisionAction, DecisionEngine};
pub use executor::{ActionExecutor, ActionStats};
pub use history::HistoryAnalyzer;

/// How many prior actions are rendered into the decision prompt.
const PRIOR_ACTION_CONTEXT: i64 = 5;

#[derive(Debug)]
pub enum CollectorError {
    Repository(RepositoryError),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repository(e) => write!(f, "repository error: {e}"),
        }
    }
}

impl std::error::Error for CollectorError {}

impl From<RepositoryError> for CollectorError {
    fn from(err: RepositoryError) -> Self {
        Self::Repository(err)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub processed: u32,
    pub actions_taken: u32,
    pub emails_sent: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub success: bool,
    pub stats: RunStats,
    pub errors: Vec<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub batch_limit: i64,
    pub stale_after_days: i64,
    pub cache_ttl_secs: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            stale_after_days: 3,
            cache_ttl_secs: 3600,
        }
    }
}

/// One step of the per-run state machine. The pipeline for each invoice is
/// Selecting -> Analyzing -> Deciding -> Executing and back to Selecting;
/// there are no backward transitions.
enum RunPhase {
    Selecting,
    Analyzing(Invoice),
    Deciding(Invoice, ClientHistoryProfile),
    Executing(Invoice, CollectionDecision),
    Done,
}

/// The collection run orchestrator. Processes eligible invoices strictly
/// sequentially; a single invoice's failure never aborts the batch, only a
/// failed eligibility load is fatal.
pub struct CollectorAgent {
    repository: Arc<dyn LedgerRepository>,
    analyzer: HistoryAnalyzer,
    engine: DecisionEngine,
    executor: ActionExecutor,
    settings: CollectorSettings,
}

impl CollectorAgent {
    pub fn new(
        repository: Arc<dyn LedgerRepository>,
        cache: Arc<dyn ReliabilityCache>,
        provider: Arc<dyn LlmProvider>,
        channel: Arc<dyn NotificationChannel>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            analyzer: HistoryAnalyzer::new(
                repository.clone(),
                cache,
                settings.cache_ttl_secs,
            ),
            engine: DecisionEngine::new(provider),
            executor: ActionExecutor::new(repository.clone(), channel),
            repository,
            settings,
        }
    }

    pub async fn run(&self, tenant_id: Uuid) -> RunOutcome {
        let started_at = Utc::now();
        let timer = std::time::Instant::now();
        let mut log = ExecutionLog::started(tenant_id, started_at);
        let run_id = log.id;
        info!("Collection run {run_id} starting for tenant {tenant_id}");

        if let Err(e) = self.repository.insert_execution_log(&log).await {
            error!("Collection run {run_id} could not be recorded: {e}");
            return RunOutcome {
                run_id,
                success: false,
                stats: RunStats::default(),
                errors: vec![format!("Failed to create execution log: {e}")],
                duration_ms: timer.elapsed().as_millis() as i64,
            };
        }

        let now = Utc::now();
        let stale_before = now - Duration::days(self.settings.stale_after_days);
        let batch = self
            .repository
            .eligible_invoices(tenant_id, now, stale_before, self.settings.batch_limit)
            .await;

        let mut queue = match batch {
            Ok(batch) => {
                info!(
                    "Collection run {run_id}: {} eligible invoice(s)",
                    batch.len()
                );
                VecDeque::from(batch)
            }
            Err(e) => {
                let message = format!("Failed to load eligible invoices: {e}");
                error!("Collection run {run_id}: {message}");
                return self
                    .finalize_failed(log, message, timer.elapsed().as_millis() as i64)
                    .await;
            }
        };

        let mut stats = RunStats::default();
        let mut errors: Vec<String> = Vec::new();
        let mut phase = RunPhase::Selecting;

        loop {
            phase = match phase {
                RunPhase::Selecting => match queue.pop_front() {
                    Some(invoice) => {
                        stats.processed += 1;
                        debug!(
                            "Collection run {run_id}: invoice {} ({} days overdue)",
                            invoice.invoice_number,
                            invoice.days_overdue(now)
                        );
                        RunPhase::Analyzing(invoice)
                    }
                    None => RunPhase::Done,
                },
                RunPhase::Analyzing(invoice) => {
                    match self
                        .analyzer
                        .analyze(tenant_id, invoice.client_email.as_deref())
                        .await
                    {
                        Ok(history) => RunPhase::Deciding(invoice, history),
                        Err(e) => {
                            stats.errors += 1;
                            errors.push(format!("{}: {e}", invoice.invoice_number));
                            RunPhase::Selecting
                        }
                    }
                }
                RunPhase::Deciding(invoice, history) => {
                    match self
                        .repository
                        .recent_actions(invoice.id, PRIOR_ACTION_CONTEXT)
                        .await
                    {
                        Ok(prior) => {
                            let decision = self.engine.decide(&invoice, &history, &prior).await;
                            RunPhase::Executing(invoice, decision)
                        }
                        Err(e) => {
                            stats.errors += 1;
                            errors.push(format!("{}: {e}", invoice.invoice_number));
                            RunPhase::Selecting
                        }
                    }
                }
                RunPhase::Executing(mut invoice, decision) => {
                    match self.executor.execute(&mut invoice, &decision, run_id).await {
                        Ok(delta) => {
                            stats.actions_taken += delta.actions_created;
                            stats.emails_sent += delta.emails_sent;
                            stats.errors += delta.errors;
                            errors.extend(delta.failures);
                        }
                        Err(e) => {
                            stats.errors += 1;
                            errors.push(format!("{}: {e}", invoice.invoice_number));
                        }
                    }
                    RunPhase::Selecting
                }
                RunPhase::Done => break,
            };
        }

        let duration_ms = timer.elapsed().as_millis() as i64;
        log.status = RunStatus::Completed.as_str().to_string();
        log.invoices_processed = stats.processed as i32;
        log.actions_created = stats.actions_taken as i32;
        log.emails_sent = stats.emails_sent as i32;
        log.errors = stats.errors as i32;
        log.finished_at = Some(Utc::now());
        log.duration_ms = Some(duration_ms);
        log.summary = Some(format!(
            "Processed {} invoice(s): {} action(s), {} email(s) sent, {} error(s)",
            stats.processed, stats.actions_taken, stats.emails_sent, stats.errors
        ));
        if let Err(e) = self.repository.update_execution_log(&log).await {
            error!("Collection run {run_id} could not be finalized: {e}");
        }
        info!(
            "Collection run {run_id} finished in {duration_ms}ms: {} processed, {} errors",
            stats.processed, stats.errors
        );

        RunOutcome {
            run_id,
            success: true,
            stats,
            errors,
            duration_ms,
        }
    }

    async fn finalize_failed(
        &self,
        mut log: ExecutionLog,
        message: String,
        duration_ms: i64,
    ) -> RunOutcome {
        let run_id = log.id;
        log.status = RunStatus::Failed.as_str().to_string();
        log.finished_at = Some(Utc::now());
        log.duration_ms = Some(duration_ms);
        log.error = Some(message.clone());
        if let Err(e) = self.repository.update_execution_log(&log).await {
            error!("Collection run {run_id} could not be finalized: {e}");
        }
        RunOutcome {
            run_id,
            success: false,
            stats: RunStats::default(),
            errors: vec![message],
            duration_ms,
        }
    }
}
