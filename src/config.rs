use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::{error, info};
use url::Url;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Payment provider connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Base URL of the provider's REST API.
    pub base_url: String,
    /// Bearer token for the provider. No default on purpose.
    pub api_token: String,
    /// Where the provider redirects the buyer after the hosted payment page.
    pub return_url: String,
    /// ISO 4217 code sent with every payment intent.
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub payment: PaymentConfig,
    /// How many `pending` poll results a session tolerates before the
    /// purchase is forced to `Failed`.
    pub max_poll_attempts: u32,
    /// Sessions idle longer than this are eligible for the expiry sweep.
    pub session_ttl_secs: u64,
    /// Bound of the event channel buffer.
    pub event_buffer: usize,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), AppConfigError> {
        Url::parse(&self.payment.base_url).map_err(|e| {
            AppConfigError::Validation(format!("payment.base_url is not a valid URL: {}", e))
        })?;
        Url::parse(&self.payment.return_url).map_err(|e| {
            AppConfigError::Validation(format!("payment.return_url is not a valid URL: {}", e))
        })?;
        if self.payment.currency.len() != 3 {
            return Err(AppConfigError::Validation(
                "payment.currency must be a 3-letter ISO code".into(),
            ));
        }
        if self.max_poll_attempts == 0 {
            return Err(AppConfigError::Validation(
                "max_poll_attempts must be at least 1".into(),
            ));
        }
        if self.db_min_connections > self.db_max_connections {
            return Err(AppConfigError::Validation(
                "db_min_connections exceeds db_max_connections".into(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from built-in defaults, then `config/default` and
/// `config/{env}` files, then `APP__`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://keyvend.db?mode=rwc")?
        .set_default("db_max_connections", 10)?
        .set_default("db_min_connections", 1)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("payment.currency", "USD")?
        .set_default("max_poll_attempts", 10)?
        .set_default("session_ttl_secs", 1800)?
        .set_default("event_buffer", 256)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // The provider token has no default; surface a clear error before
    // deserialization turns it into a generic missing-field message.
    if config.get_string("payment.api_token").is_err() {
        error!("payment provider token is not configured; set APP__PAYMENT__API_TOKEN");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "payment.api_token is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("configuration validation failed: {}", e);
        e
    })?;

    Ok(app_config)
}
