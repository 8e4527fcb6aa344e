use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Payment provider (hosted checkout) configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentProviderConfig {
    /// Provider API base URL
    pub base_url: String,

    /// Client-credentials id; checkout initiation fails fast when missing
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client-credentials secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Currency sent with checkout creation
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for PaymentProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.payment-provider.test".to_string(),
            client_id: None,
            client_secret: None,
            timeout_secs: default_provider_timeout_secs(),
            currency: default_currency(),
        }
    }
}

/// Loyalty program configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct LoyaltyConfig {
    /// Scheduler tick interval in seconds (daily by default)
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Year-to-date spend required to qualify for the birthday reward
    #[serde(default = "default_birthday_spend_threshold")]
    pub birthday_spend_threshold: rust_decimal::Decimal,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            birthday_spend_threshold: default_birthday_spend_threshold(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Payment provider settings
    #[serde(default)]
    pub payment_provider: PaymentProviderConfig,

    /// Shared secret for provider webhook signatures; unsigned webhooks are
    /// accepted when unset (development only)
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Allowed webhook timestamp skew in seconds
    #[serde(default)]
    pub payment_webhook_tolerance_secs: Option<u64>,

    /// Loyalty program settings
    #[serde(default)]
    pub loyalty: LoyaltyConfig,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_provider_timeout_secs() -> u64 {
    10
}
fn default_currency() -> String {
    "EUR".to_string()
}
fn default_cycle_interval_secs() -> u64 {
    86_400
}
fn default_birthday_spend_threshold() -> rust_decimal::Decimal {
    rust_decimal::Decimal::new(500, 0)
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://bistro.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Initializes the global tracing subscriber from config.
pub fn init_tracing(log_level: &str, log_json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            environment: "development".into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            payment_provider: PaymentProviderConfig::default(),
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: None,
            loyalty: LoyaltyConfig::default(),
            cors_allowed_origins: None,
        }
    }

    #[test]
    fn environment_helpers() {
        let mut cfg = base_config();
        assert!(cfg.is_development());
        cfg.environment = "Production".into();
        assert!(cfg.is_production());
    }

    #[test]
    fn loyalty_defaults_are_sane() {
        let cfg = base_config();
        assert_eq!(cfg.loyalty.cycle_interval_secs, 86_400);
        assert!(cfg.loyalty.birthday_spend_threshold > rust_decimal::Decimal::ZERO);
    }
}
