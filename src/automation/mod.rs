use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use log::{error, info};
use tokio::time::{interval, Duration};

use crate::shared::state::AppState;

/// Fires scheduled collection sweeps: a one-minute ticker checks the
/// configured cron expression and, when due, runs the collector for every
/// tenant with open invoices, one tenant at a time.
pub struct CollectionScheduler {
    state: Arc<AppState>,
}

impl CollectionScheduler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn spawn(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let expression = self.state.config.collector.schedule.clone();
        let schedule = Schedule::from_str(&expression)?;
        info!("Collection scheduler started ({expression})");

        let mut ticker = interval(Duration::from_secs(60));
        let mut last_triggered: Option<DateTime<Utc>> = None;

        loop {
            ticker.tick().await;
            let now = Utc::now();
            let Some(next) = schedule.upcoming(Utc).next() else {
                continue;
            };
            if (next - now).num_minutes() >= 1 {
                continue;
            }
            if let Some(last) = last_triggered {
                if (now - last).num_minutes() < 1 {
                    continue;
                }
            }
            last_triggered = Some(now);
            self.run_all_tenants().await;
        }
    }

    async fn run_all_tenants(&self) {
        let tenants = match self.state.repository.tenants_with_open_invoices().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Could not list tenants for the scheduled sweep: {e}");
                return;
            }
        };
        info!("Scheduled collection sweep across {} tenant(s)", tenants.len());

        for tenant_id in tenants {
            if !self.state.begin_run(tenant_id).await {
                info!("Tenant {tenant_id} already has a run in flight; skipping");
                continue;
            }
            let outcome = self.state.agent().run(tenant_id).await;
            self.state.finish_run(tenant_id).await;
            if !outcome.success {
                error!(
                    "Scheduled run for tenant {tenant_id} failed: {}",
                    outcome.errors.join("; ")
                );
            }
        }
    }
}
