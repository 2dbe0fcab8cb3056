use std::sync::Arc;

use bigdecimal::ToPrimitive;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use uuid::Uuid;

use super::CollectorError;
use crate::cache::{client_history_key, ReliabilityCache};
use crate::repository::LedgerRepository;
use crate::shared::models::{ClientHistoryProfile, Invoice, InvoiceStatus};

/// Computes a client's payment-reliability profile from their invoice
/// history, with a cache in front of the aggregation query.
pub struct HistoryAnalyzer {
    repository: Arc<dyn LedgerRepository>,
    cache: Arc<dyn ReliabilityCache>,
    cache_ttl_secs: u64,
}

impl HistoryAnalyzer {
    pub fn new(
        repository: Arc<dyn LedgerRepository>,
        cache: Arc<dyn ReliabilityCache>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            repository,
            cache,
            cache_ttl_secs,
        }
    }

    /// An invoice without a client email must still be processable; it gets
    /// the neutral profile and the decision step takes it from there.
    pub async fn analyze(
        &self,
        tenant_id: Uuid,
        client_email: Option<&str>,
    ) -> Result<ClientHistoryProfile, CollectorError> {
        let email = match client_email {
            Some(e) if !e.trim().is_empty() => e,
            _ => return Ok(ClientHistoryProfile::neutral()),
        };

        let key = client_history_key(tenant_id, email);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<ClientHistoryProfile>(&raw) {
                Ok(profile) => {
                    debug!("History cache hit for {key}");
                    return Ok(profile);
                }
                Err(e) => warn!("Discarding unreadable cache entry {key}: {e}"),
            },
            Ok(None) => {}
            Err(e) => warn!("Reliability cache read failed for {key}: {e}"),
        }

        let invoices = self.repository.client_invoices(tenant_id, email).await?;
        let profile = profile_from_invoices(&invoices, Utc::now());

        match serde_json::to_string(&profile) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, &raw, self.cache_ttl_secs).await {
                    warn!("Reliability cache write failed for {key}: {e}");
                }
            }
            Err(e) => warn!("Could not serialize history profile for {key}: {e}"),
        }

        Ok(profile)
    }
}

fn profile_from_invoices(invoices: &[Invoice], now: DateTime<Utc>) -> ClientHistoryProfile {
    if invoices.is_empty() {
        return ClientHistoryProfile::neutral();
    }

    let total_invoices = invoices.len() as i64;
    let paid: Vec<&Invoice> = invoices
        .iter()
        .filter(|i| i.status() == InvoiceStatus::Paid)
        .collect();
    let total_paid = paid.len() as i64;

    let paid_on_time = paid.iter().filter(|i| i.updated_at <= i.due_date).count() as i64;

    let avg_days_to_payment = if paid.is_empty() {
        0.0
    } else {
        let total_days: f64 = paid
            .iter()
            .map(|i| (i.updated_at - i.issue_date).num_seconds() as f64 / 86_400.0)
            .sum();
        total_days / paid.len() as f64
    };

    let reliability_score = paid_on_time as f64 / total_invoices as f64;

    let overdue: Vec<&Invoice> = invoices
        .iter()
        .filter(|i| {
            i.status() != InvoiceStatus::Paid
                && i.status() != InvoiceStatus::Cancelled
                && i.due_date < now
        })
        .collect();
    let overdue_amount = overdue
        .iter()
        .map(|i| i.outstanding().to_f64().unwrap_or(0.0))
        .sum();

    ClientHistoryProfile {
        total_invoices,
        total_paid,
        paid_on_time,
        avg_days_to_payment,
        reliability_score,
        overdue_count: overdue.len() as i64,
        overdue_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fixture_invoice, MemoryLedger, MemoryReliabilityCache};
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    fn analyzer(
        ledger: Arc<MemoryLedger>,
        cache: Arc<MemoryReliabilityCache>,
    ) -> HistoryAnalyzer {
        HistoryAnalyzer::new(ledger, cache, 3600)
    }

    #[tokio::test]
    async fn missing_email_yields_neutral_profile_without_queries() {
        let ledger = Arc::new(MemoryLedger::default());
        let analyzer = analyzer(ledger.clone(), Arc::new(MemoryReliabilityCache::default()));

        let profile = analyzer.analyze(Uuid::new_v4(), None).await.unwrap();
        assert_eq!(profile, ClientHistoryProfile::neutral());
        let profile = analyzer.analyze(Uuid::new_v4(), Some("  ")).await.unwrap();
        assert_eq!(profile.reliability_score, 1.0);
        assert_eq!(ledger.history_queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        let mut paid = fixture_invoice(tenant, "INV-1");
        paid.status = "PAID".to_string();
        paid.updated_at = paid.due_date - Duration::days(1);
        ledger.invoices.write().await.push(paid);

        let analyzer = analyzer(ledger.clone(), Arc::new(MemoryReliabilityCache::default()));

        let first = analyzer
            .analyze(tenant, Some("billing@acme.test"))
            .await
            .unwrap();
        let second = analyzer
            .analyze(tenant, Some("billing@acme.test"))
            .await
            .unwrap();

        assert_eq!(ledger.history_queries.load(Ordering::SeqCst), 1);
        assert_eq!(first.reliability_score, second.reliability_score);
    }

    #[tokio::test]
    async fn cache_failures_degrade_to_recomputation() {
        let tenant = Uuid::new_v4();
        let ledger = Arc::new(MemoryLedger::default());
        ledger
            .invoices
            .write()
            .await
            .push(fixture_invoice(tenant, "INV-1"));

        let cache = Arc::new(MemoryReliabilityCache::default());
        cache.fail_reads.store(true, Ordering::SeqCst);
        cache.fail_writes.store(true, Ordering::SeqCst);
        let analyzer = analyzer(ledger.clone(), cache);

        let first = analyzer
            .analyze(tenant, Some("billing@acme.test"))
            .await
            .unwrap();
        let second = analyzer
            .analyze(tenant, Some("billing@acme.test"))
            .await
            .unwrap();

        // every call recomputes, but none of them fail
        assert_eq!(ledger.history_queries.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn profile_aggregates_paid_and_overdue_history() {
        let tenant = Uuid::new_v4();
        let now = Utc::now();
        let mut invoices = Vec::new();

        // paid on time, 10 days after issue
        let mut a = fixture_invoice(tenant, "INV-A");
        a.status = "PAID".to_string();
        a.issue_date = now - Duration::days(40);
        a.due_date = now - Duration::days(10);
        a.updated_at = now - Duration::days(30);
        invoices.push(a);

        // paid late, 30 days after issue
        let mut b = fixture_invoice(tenant, "INV-B");
        b.status = "PAID".to_string();
        b.issue_date = now - Duration::days(40);
        b.due_date = now - Duration::days(20);
        b.updated_at = now - Duration::days(10);
        invoices.push(b);

        // still overdue
        let mut c = fixture_invoice(tenant, "INV-C");
        c.status = "OVERDUE".to_string();
        c.due_date = now - Duration::days(5);
        invoices.push(c);

        let profile = profile_from_invoices(&invoices, now);
        assert_eq!(profile.total_invoices, 3);
        assert_eq!(profile.total_paid, 2);
        assert_eq!(profile.paid_on_time, 1);
        assert!((profile.reliability_score - 1.0 / 3.0).abs() < 1e-9);
        assert!((profile.avg_days_to_payment - 20.0).abs() < 1e-9);
        assert_eq!(profile.overdue_count, 1);
        assert!((profile.overdue_amount - 1000.0).abs() < 1e-9);
    }
}
