use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::retry::RetryConfig;
use crate::services::settlement_poller::PollConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.tosspayments.com";
const DEFAULT_LEDGER_BACKEND: &str = "in-memory";
const DEFAULT_LEDGER_NAMESPACE: &str = "salon:settlement";
const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_POLL_DELAY_MS: u64 = 2_000;
const DEFAULT_DRAFT_TTL_SECS: u64 = 86_400;

/// Where the dedup ledger and drafts live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum LedgerBackend {
    InMemory,
    Redis,
}

/// Settlement service configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SettlementConfig {
    /// Application environment
    pub environment: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Payment gateway API root
    #[validate(url)]
    pub gateway_base_url: String,

    /// Gateway secret key, sent as the Basic auth user name
    #[validate(length(min = 1))]
    pub gateway_secret_key: String,

    /// Booking backend root (reservation lookup and settlement commit)
    #[validate(url)]
    pub api_base_url: String,

    /// Optional bearer token for the booking backend
    #[serde(default)]
    pub api_token: Option<String>,

    /// Timeout applied to every external call
    #[serde(default = "default_call_timeout_ms")]
    #[validate(range(min = 1))]
    pub call_timeout_ms: u64,

    /// Attempts for read-only calls that fail on the wire
    #[serde(default = "default_read_retry_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub read_retry_attempts: u32,

    #[serde(default = "default_read_retry_initial_delay_ms")]
    pub read_retry_initial_delay_ms: u64,

    #[serde(default = "default_read_retry_max_delay_ms")]
    pub read_retry_max_delay_ms: u64,

    /// How many reconciliation passes a callback gets before reporting a delay
    #[serde(default = "default_poll_max_attempts")]
    #[validate(range(min = 1))]
    pub poll_max_attempts: u32,

    /// Fixed wait between reconciliation passes
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,

    /// "in-memory" or "redis"
    #[serde(default = "default_ledger_backend")]
    #[validate(custom = "validate_ledger_backend")]
    pub ledger_backend: String,

    /// Redis connection URL, used by the redis backend
    pub redis_url: String,

    /// Key prefix for ledger records and drafts
    #[serde(default = "default_ledger_namespace")]
    #[validate(length(min = 1))]
    pub ledger_namespace: String,

    /// Lifetime of an unpaid draft in the redis backend
    #[serde(default = "default_draft_ttl_secs")]
    #[validate(range(min = 60))]
    pub draft_ttl_secs: u64,
}

impl SettlementConfig {
    /// Creates a new configuration with defaults for everything but the endpoints
    pub fn new(
        gateway_secret_key: String,
        api_base_url: String,
        environment: String,
    ) -> Self {
        Self {
            environment,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            log_level: default_log_level(),
            log_json: false,
            gateway_base_url: DEFAULT_GATEWAY_BASE_URL.to_string(),
            gateway_secret_key,
            api_base_url,
            api_token: None,
            call_timeout_ms: default_call_timeout_ms(),
            read_retry_attempts: default_read_retry_attempts(),
            read_retry_initial_delay_ms: default_read_retry_initial_delay_ms(),
            read_retry_max_delay_ms: default_read_retry_max_delay_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_delay_ms: default_poll_delay_ms(),
            ledger_backend: default_ledger_backend(),
            redis_url: "redis://localhost:6379".to_string(),
            ledger_namespace: default_ledger_namespace(),
            draft_ttl_secs: default_draft_ttl_secs(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn draft_ttl(&self) -> Duration {
        Duration::from_secs(self.draft_ttl_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.read_retry_attempts,
            initial_delay: Duration::from_millis(self.read_retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.read_retry_max_delay_ms),
            ..RetryConfig::default()
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            max_attempts: self.poll_max_attempts,
            delay: Duration::from_millis(self.poll_delay_ms),
        }
    }

    /// Parsed ledger backend. Falls back to in-memory only if validation was skipped.
    pub fn ledger_backend(&self) -> LedgerBackend {
        self.ledger_backend
            .parse()
            .unwrap_or(LedgerBackend::InMemory)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.gateway_secret_key.trim().starts_with("test_") {
            let mut err = ValidationError::new("gateway_secret_key_test_mode");
            err.message = Some(
                "A test-mode gateway key must not be used in production. Set APP__GATEWAY_SECRET_KEY to the live key."
                    .into(),
            );
            errors.add("gateway_secret_key", err);
        }

        if self.read_retry_initial_delay_ms > self.read_retry_max_delay_ms {
            let mut err = ValidationError::new("read_retry_delay_order");
            err.message = Some("read_retry_initial_delay_ms must not exceed read_retry_max_delay_ms".into());
            errors.add("read_retry_initial_delay_ms", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_read_retry_attempts() -> u32 {
    3
}

fn default_read_retry_initial_delay_ms() -> u64 {
    100
}

fn default_read_retry_max_delay_ms() -> u64 {
    2_000
}

fn default_poll_max_attempts() -> u32 {
    DEFAULT_POLL_MAX_ATTEMPTS
}

fn default_poll_delay_ms() -> u64 {
    DEFAULT_POLL_DELAY_MS
}

fn default_ledger_backend() -> String {
    DEFAULT_LEDGER_BACKEND.to_string()
}

fn default_ledger_namespace() -> String {
    DEFAULT_LEDGER_NAMESPACE.to_string()
}

fn default_draft_ttl_secs() -> u64 {
    DEFAULT_DRAFT_TTL_SECS
}

fn validate_ledger_backend(value: &str) -> Result<(), ValidationError> {
    value.parse::<LedgerBackend>().map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("ledger_backend");
        err.message = Some("Must be one of: in-memory, redis".into());
        err
    })
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("salon_settlement={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads settlement configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Docker config (config/docker.toml) if DOCKER env var is set
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<SettlementConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

pub fn load_config_from(config_dir: &Path) -> Result<SettlementConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    // gateway_secret_key and api_base_url have no defaults and must be provided.
    let mut builder = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("gateway_base_url", DEFAULT_GATEWAY_BASE_URL)?
        .set_default("redis_url", "redis://localhost:6379")?
        .add_source(File::with_name(&config_dir.join("default").to_string_lossy()).required(false))
        .add_source(File::with_name(&config_dir.join(&run_env).to_string_lossy()).required(false));

    if env::var("DOCKER").is_ok() {
        info!("Docker environment detected");
        builder = builder.add_source(
            File::with_name(&config_dir.join("docker").to_string_lossy()).required(false),
        );
    }

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("gateway_secret_key").is_err() {
        error!("Gateway secret key is not configured. Set APP__GATEWAY_SECRET_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "gateway_secret_key is required but not configured".into(),
        )));
    }

    let settlement_config: SettlementConfig = config.try_deserialize()?;

    settlement_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    settlement_config
        .validate_additional_constraints()
        .map_err(|e| {
            error!("Configuration security validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;

    info!("Configuration loaded successfully");
    Ok(settlement_config)
}
