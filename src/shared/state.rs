use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cache::ReliabilityCache;
use crate::collector::{CollectorAgent, CollectorSettings};
use crate::config::AppConfig;
use crate::email::NotificationChannel;
use crate::llm::LlmProvider;
use crate::repository::LedgerRepository;

/// Shared service state: the injected collaborators every collection run is
/// wired to, plus the per-tenant run guard.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repository: Arc<dyn LedgerRepository>,
    pub cache: Arc<dyn ReliabilityCache>,
    pub llm: Arc<dyn LlmProvider>,
    pub channel: Arc<dyn NotificationChannel>,
    /// Tenants with a collection run currently in flight in this process.
    pub running: Arc<RwLock<HashSet<Uuid>>>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        repository: Arc<dyn LedgerRepository>,
        cache: Arc<dyn ReliabilityCache>,
        llm: Arc<dyn LlmProvider>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            config,
            repository,
            cache,
            llm,
            channel,
            running: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn agent(&self) -> CollectorAgent {
        CollectorAgent::new(
            self.repository.clone(),
            self.cache.clone(),
            self.llm.clone(),
            self.channel.clone(),
            CollectorSettings {
                batch_limit: self.config.collector.batch_limit,
                stale_after_days: self.config.collector.stale_after_days,
                cache_ttl_secs: self.config.collector.cache_ttl_secs,
            },
        )
    }

    /// Marks a tenant's run as in flight. Returns false when one already is.
    pub async fn begin_run(&self, tenant_id: Uuid) -> bool {
        self.running.write().await.insert(tenant_id)
    }

    pub async fn finish_run(&self, tenant_id: Uuid) {
        self.running.write().await.remove(&tenant_id);
    }
}
