use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use log::{info, warn};
use tower_http::trace::TraceLayer;

use collectorai::api::collector_router;
use collectorai::automation::CollectionScheduler;
use collectorai::cache::{NoopCache, RedisCache, ReliabilityCache};
use collectorai::config::AppConfig;
use collectorai::email::{NotificationChannel, SmtpChannel};
use collectorai::llm::{AnthropicClient, LlmProvider, OpenAiClient};
use collectorai::repository::{LedgerRepository, PgLedgerRepository};
use collectorai::shared::state::AppState;
use collectorai::shared::utils::create_conn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Arc::new(AppConfig::from_env().context("Failed to load configuration")?);

    let pool = create_conn(&config.database_url()).context("Failed to create database pool")?;
    let repository: Arc<dyn LedgerRepository> = Arc::new(PgLedgerRepository::new(pool));

    let cache: Arc<dyn ReliabilityCache> = match redis::Client::open(config.cache_url.as_str()) {
        Ok(client) => Arc::new(RedisCache::new(Arc::new(client))),
        Err(e) => {
            warn!("Failed to open cache connection, running uncached: {e}");
            Arc::new(NoopCache)
        }
    };

    let llm: Arc<dyn LlmProvider> = match config.llm.provider.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(
            config.llm.api_key.clone(),
            Some(config.llm.base_url.clone()),
            config.llm.model.clone(),
        )),
        _ => Arc::new(OpenAiClient::new(
            config.llm.api_key.clone(),
            Some(config.llm.base_url.clone()),
            config.llm.model.clone(),
        )),
    };

    let channel: Arc<dyn NotificationChannel> = Arc::new(SmtpChannel::new(config.smtp.clone()));

    let state = Arc::new(AppState::new(config.clone(), repository, cache, llm, channel));

    let scheduler_state = state.clone();
    tokio::spawn(async move {
        let scheduler = CollectionScheduler::new(scheduler_state);
        if let Err(e) = scheduler.spawn().await {
            log::error!("Collection scheduler stopped: {e}");
        }
    });

    let app = collector_router(state).layer(TraceLayer::new_for_http());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
