use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::shared::models::{CollectionAction, ExecutionLog, Invoice, PaymentPlan};
use crate::shared::utils::DbPool;

/// Statuses a collection run may act on.
pub const ACTIVE_STATUSES: [&str; 3] = ["SENT", "OVERDUE", "PARTIAL"];

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Read/write access to invoices, collection actions, payment plans and
/// execution logs. The engine only ever talks to this trait; the Postgres
/// implementation below is wired in at the service layer.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Invoices eligible for a run: active status, and either never followed
    /// up while past due, followed up too long ago, or explicitly scheduled.
    /// Oldest due date first, capped at `limit`.
    async fn eligible_invoices(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invoice>, RepositoryError>;

    /// Every invoice of one client within a tenant, for history profiling.
    async fn client_invoices(
        &self,
        tenant_id: Uuid,
        client_email: &str,
    ) -> Result<Vec<Invoice>, RepositoryError>;

    /// Most recent collection actions against one invoice, newest first.
    async fn recent_actions(
        &self,
        invoice_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CollectionAction>, RepositoryError>;

    async fn insert_action(&self, action: &CollectionAction) -> Result<(), RepositoryError>;

    async fn update_action(&self, action: &CollectionAction) -> Result<(), RepositoryError>;

    async fn insert_payment_plan(&self, plan: &PaymentPlan) -> Result<(), RepositoryError>;

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), RepositoryError>;

    async fn insert_execution_log(&self, log: &ExecutionLog) -> Result<(), RepositoryError>;

    async fn update_execution_log(&self, log: &ExecutionLog) -> Result<(), RepositoryError>;

    async fn execution_logs(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>, RepositoryError>;

    async fn execution_log(&self, run_id: Uuid) -> Result<Option<ExecutionLog>, RepositoryError>;

    /// Tenants that currently have invoices in an active status; the
    /// scheduler iterates these.
    async fn tenants_with_open_invoices(&self) -> Result<Vec<Uuid>, RepositoryError>;
}

pub struct PgLedgerRepository {
    pool: DbPool,
}

impl PgLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>,
        RepositoryError,
    > {
        self.pool.get().map_err(|e| RepositoryError::Pool(e.to_string()))
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn eligible_invoices(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        use crate::shared::schema::invoices::dsl as inv;

        let mut conn = self.conn()?;
        let rows = inv::invoices
            .filter(inv::tenant_id.eq(tenant_id))
            .filter(inv::status.eq_any(ACTIVE_STATUSES))
            .filter(
                inv::follow_up_count
                    .eq(0)
                    .and(inv::due_date.lt(now))
                    .or(inv::last_follow_up_at.lt(stale_before))
                    .or(inv::next_action_date.le(now)),
            )
            .order(inv::due_date.asc())
            .limit(limit)
            .load::<Invoice>(&mut conn)?;
        Ok(rows)
    }

    async fn client_invoices(
        &self,
        tenant_id: Uuid,
        client_email: &str,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        use crate::shared::schema::invoices::dsl as inv;

        let mut conn = self.conn()?;
        let rows = inv::invoices
            .filter(inv::tenant_id.eq(tenant_id))
            .filter(inv::client_email.eq(client_email))
            .order(inv::issue_date.asc())
            .load::<Invoice>(&mut conn)?;
        Ok(rows)
    }

    async fn recent_actions(
        &self,
        invoice_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CollectionAction>, RepositoryError> {
        use crate::shared::schema::collection_actions::dsl as act;

        let mut conn = self.conn()?;
        let rows = act::collection_actions
            .filter(act::invoice_id.eq(invoice_id))
            .order(act::created_at.desc())
            .limit(limit)
            .load::<CollectionAction>(&mut conn)?;
        Ok(rows)
    }

    async fn insert_action(&self, action: &CollectionAction) -> Result<(), RepositoryError> {
        use crate::shared::schema::collection_actions::dsl as act;

        let mut conn = self.conn()?;
        diesel::insert_into(act::collection_actions)
            .values(action)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn update_action(&self, action: &CollectionAction) -> Result<(), RepositoryError> {
        use crate::shared::schema::collection_actions::dsl as act;

        let mut conn = self.conn()?;
        diesel::update(act::collection_actions.filter(act::id.eq(action.id)))
            .set(action)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn insert_payment_plan(&self, plan: &PaymentPlan) -> Result<(), RepositoryError> {
        use crate::shared::schema::payment_plans::dsl as pp;

        let mut conn = self.conn()?;
        diesel::insert_into(pp::payment_plans)
            .values(plan)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), RepositoryError> {
        use crate::shared::schema::invoices::dsl as inv;

        let mut conn = self.conn()?;
        diesel::update(inv::invoices.filter(inv::id.eq(invoice.id)))
            .set(invoice)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn insert_execution_log(&self, log: &ExecutionLog) -> Result<(), RepositoryError> {
        use crate::shared::schema::execution_logs::dsl as el;

        let mut conn = self.conn()?;
        diesel::insert_into(el::execution_logs)
            .values(log)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn update_execution_log(&self, log: &ExecutionLog) -> Result<(), RepositoryError> {
        use crate::shared::schema::execution_logs::dsl as el;

        let mut conn = self.conn()?;
        diesel::update(el::execution_logs.filter(el::id.eq(log.id)))
            .set(log)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn execution_logs(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLog>, RepositoryError> {
        use crate::shared::schema::execution_logs::dsl as el;

        let mut conn = self.conn()?;
        let rows = el::execution_logs
            .filter(el::tenant_id.eq(tenant_id))
            .order(el::started_at.desc())
            .limit(limit)
            .load::<ExecutionLog>(&mut conn)?;
        Ok(rows)
    }

    async fn execution_log(&self, run_id: Uuid) -> Result<Option<ExecutionLog>, RepositoryError> {
        use crate::shared::schema::execution_logs::dsl as el;

        let mut conn = self.conn()?;
        let row = el::execution_logs
            .filter(el::id.eq(run_id))
            .first::<ExecutionLog>(&mut conn)
            .optional()?;
        Ok(row)
    }

    async fn tenants_with_open_invoices(&self) -> Result<Vec<Uuid>, RepositoryError> {
        use crate::shared::schema::invoices::dsl as inv;

        let mut conn = self.conn()?;
        let rows = inv::invoices
            .filter(inv::status.eq_any(ACTIVE_STATUSES))
            .select(inv::tenant_id)
            .distinct()
            .load::<Uuid>(&mut conn)?;
        Ok(rows)
    }
}
