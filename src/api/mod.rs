use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::collector::RunOutcome;
use crate::shared::models::{ExecutionLog, Invoice};
use crate::shared::state::AppState;

pub fn collector_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/collector/tenants/:tenant_id/runs",
            post(trigger_run).get(list_runs),
        )
        .route("/api/collector/runs/:run_id", get(get_run))
        .route(
            "/api/collector/tenants/:tenant_id/invoices/overdue",
            get(list_overdue_invoices),
        )
        .with_state(state)
}

/// Operator-triggered collection run. One run per tenant at a time; the
/// engine itself does not lock, so the guard lives here.
async fn trigger_run(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunOutcome>), (StatusCode, String)> {
    if !state.begin_run(tenant_id).await {
        return Err((
            StatusCode::CONFLICT,
            format!("A collection run is already in flight for tenant {tenant_id}"),
        ));
    }

    let outcome = state.agent().run(tenant_id).await;
    state.finish_run(tenant_id).await;

    let code = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((code, Json(outcome)))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<ExecutionLog>>, (StatusCode, String)> {
    let logs = state
        .repository
        .execution_logs(tenant_id, 20)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    Ok(Json(logs))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ExecutionLog>, (StatusCode, String)> {
    let log = state
        .repository
        .execution_log(run_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Run not found".to_string()))?;
    Ok(Json(log))
}

/// Preview of the batch the next run would pick up.
async fn list_overdue_invoices(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<Invoice>>, (StatusCode, String)> {
    let now = Utc::now();
    let stale_before = now - Duration::days(state.config.collector.stale_after_days);
    let invoices = state
        .repository
        .eligible_invoices(tenant_id, now, stale_before, state.config.collector.batch_limit)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    Ok(Json(invoices))
}
