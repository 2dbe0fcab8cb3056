use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub llm: LlmConfig,
    pub collector: CollectorConfig,
    pub cache_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u32,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// "openai" or "anthropic"
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Cron expression evaluated by the scheduler.
    pub schedule: String,
    pub batch_limit: i64,
    pub stale_after_days: i64,
    pub cache_ttl_secs: u64,
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        let database = DatabaseConfig {
            username: get_env("TABLES_USERNAME", "collector"),
            password: get_env("TABLES_PASSWORD", ""),
            server: get_env("TABLES_SERVER", "localhost"),
            port: env::var("TABLES_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            database: get_env("TABLES_DATABASE", "collectorai"),
        };

        let server = ServerConfig {
            host: get_env("SERVER_HOST", "0.0.0.0"),
            port: env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8085),
        };

        let smtp = SmtpConfig {
            host: get_env("SMTP_HOST", "localhost"),
            port: env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(587),
            username: env::var("SMTP_USER").ok(),
            password: env::var("SMTP_PASS").ok(),
            from: get_env("SMTP_FROM", "collections@localhost"),
        };

        let llm = LlmConfig {
            provider: get_env("LLM_PROVIDER", "openai"),
            base_url: get_env("LLM_URL", "https://api.openai.com/v1"),
            api_key: get_env("LLM_KEY", "empty"),
            model: get_env("LLM_MODEL", "gpt-4o-mini"),
        };

        let collector = CollectorConfig {
            schedule: get_env("COLLECTOR_SCHEDULE", "0 0 9 * * * *"),
            batch_limit: env::var("COLLECTOR_BATCH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            stale_after_days: env::var("COLLECTOR_STALE_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            cache_ttl_secs: env::var("COLLECTOR_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
        };

        let cache_url = env::var("CACHE_URL")
            .or_else(|_| env::var("REDIS_URL"))
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(Self {
            database,
            server,
            smtp,
            llm,
            collector,
            cache_url,
        })
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.username,
            self.database.password,
            self.database.server,
            self.database.port,
            self.database.database
        )
    }
}
