use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_STORE_BACKEND: &str = "in-memory";

/// Application configuration structure with validation
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment; `production` disables diagnostic error details
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    // ========== Payment provider ==========
    /// Mercado Pago access token. Never logged.
    #[serde(default)]
    pub mercadopago_access_token: Option<String>,

    #[serde(default = "default_mercadopago_api_base")]
    #[validate(url)]
    pub mercadopago_api_base: String,

    /// Timeout applied to every outbound call (seconds)
    #[serde(default = "default_provider_timeout_secs")]
    #[validate(range(min = 1, max = 30))]
    pub provider_timeout_secs: u64,

    /// Storefront URL used to build back_urls
    #[serde(default = "default_public_base_url")]
    #[validate(url)]
    pub public_base_url: String,

    /// Webhook callback URL; defaults to `{public_base_url}/webhooks/payment`
    #[serde(default)]
    pub notification_url: Option<String>,

    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub currency: String,

    #[serde(default = "default_statement_descriptor")]
    #[validate(length(min = 1, max = 22))]
    pub statement_descriptor: String,

    #[serde(default = "default_category")]
    pub default_category: String,

    #[serde(default = "default_max_title_length")]
    #[validate(range(min = 1, max = 256))]
    pub max_title_length: usize,

    /// Restrict the hosted checkout to PIX
    #[serde(default = "default_true_bool")]
    pub pix_only: bool,

    /// Return the sandbox checkout URL as `checkoutUrl`
    #[serde(default)]
    pub use_sandbox_checkout: bool,

    /// Preference validity window; `None` sends `expires=false`
    #[serde(default)]
    pub preference_expiration_minutes: Option<u32>,

    // ========== Webhooks ==========
    /// Secret for verifying `x-signature` on payment notifications
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    #[serde(default = "default_recovery_interval_secs")]
    #[validate(range(min = 1))]
    pub recovery_interval_secs: u64,

    #[serde(default = "default_recovery_max_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub recovery_max_attempts: u32,

    // ========== Order store ==========
    /// "in-memory" or "sanity"
    #[serde(default = "default_store_backend")]
    #[validate(custom = "validate_store_backend")]
    pub order_store_backend: String,

    #[serde(default)]
    pub sanity_project_id: Option<String>,

    #[serde(default = "default_sanity_dataset")]
    pub sanity_dataset: String,

    /// Write token for the content store. Never logged.
    #[serde(default)]
    pub sanity_token: Option<String>,

    #[serde(default = "default_sanity_api_version")]
    pub sanity_api_version: String,

    #[serde(default = "default_sanity_api_host")]
    pub sanity_api_host: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("log_level", &self.log_level)
            .field("has_mercadopago_access_token", &self.has_mercadopago_credential())
            .field("public_base_url", &self.public_base_url)
            .field("currency", &self.currency)
            .field("order_store_backend", &self.order_store_backend)
            .field("has_webhook_secret", &self.webhook_secret.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            cors_allowed_origins: None,
            mercadopago_access_token: None,
            mercadopago_api_base: default_mercadopago_api_base(),
            provider_timeout_secs: default_provider_timeout_secs(),
            public_base_url: default_public_base_url(),
            notification_url: None,
            currency: default_currency(),
            statement_descriptor: default_statement_descriptor(),
            default_category: default_category(),
            max_title_length: default_max_title_length(),
            pix_only: true,
            use_sandbox_checkout: false,
            preference_expiration_minutes: None,
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            recovery_interval_secs: default_recovery_interval_secs(),
            recovery_max_attempts: default_recovery_max_attempts(),
            order_store_backend: default_store_backend(),
            sanity_project_id: None,
            sanity_dataset: default_sanity_dataset(),
            sanity_token: None,
            sanity_api_version: default_sanity_api_version(),
            sanity_api_host: default_sanity_api_host(),
        }
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Whether error bodies may carry internal details
    pub fn diagnostics_enabled(&self) -> bool {
        !self.is_production()
    }

    pub fn mercadopago_access_token(&self) -> Option<&str> {
        self.mercadopago_access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn has_mercadopago_credential(&self) -> bool {
        self.mercadopago_access_token().is_some()
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    pub fn notification_url(&self) -> String {
        match self.notification_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("{}/webhooks/payment", self.base_url()),
        }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    pub fn uses_sanity_store(&self) -> bool {
        self.order_store_backend.eq_ignore_ascii_case("sanity")
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && !self.has_mercadopago_credential() {
            let mut err = ValidationError::new("mercadopago_access_token_required");
            err.message =
                Some("Set APP__MERCADOPAGO_ACCESS_TOKEN before running in production".into());
            errors.add("mercadopago_access_token", err);
        }

        if self.uses_sanity_store() {
            let blank = |value: &Option<String>| {
                value.as_deref().map_or(true, |v| v.trim().is_empty())
            };
            if blank(&self.sanity_project_id) {
                let mut err = ValidationError::new("sanity_project_id_required");
                err.message = Some("APP__SANITY_PROJECT_ID is required for the sanity backend".into());
                errors.add("sanity_project_id", err);
            }
            if blank(&self.sanity_token) {
                let mut err = ValidationError::new("sanity_token_required");
                err.message = Some("APP__SANITY_TOKEN is required for the sanity backend".into());
                errors.add("sanity_token", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Runs field validation plus the cross-field checks.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.validate_additional_constraints()
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_mercadopago_api_base() -> String {
    crate::providers::mercadopago::DEFAULT_API_BASE.to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_public_base_url() -> String {
    DEFAULT_PUBLIC_BASE_URL.to_string()
}

fn default_currency() -> String {
    "BRL".to_string()
}

fn default_statement_descriptor() -> String {
    "LOJA ONLINE".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

fn default_max_title_length() -> usize {
    256
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_recovery_interval_secs() -> u64 {
    30
}

fn default_recovery_max_attempts() -> u32 {
    8
}

fn default_store_backend() -> String {
    DEFAULT_STORE_BACKEND.to_string()
}

fn default_sanity_dataset() -> String {
    "production".to_string()
}

fn default_sanity_api_version() -> String {
    "2024-12-15".to_string()
}

fn default_sanity_api_host() -> String {
    "api.sanity.io".to_string()
}

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

fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Must be a three-letter ISO 4217 code, e.g. BRL".into());
        Err(err)
    }
}

fn validate_store_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "sanity" => Ok(()),
        _ => {
            let mut err = ValidationError::new("order_store_backend");
            err.message = Some("Must be one of: in-memory, sanity".into());
            Err(err)
        }
    }
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    load_config_from(Path::new(CONFIG_DIR), &run_env, "APP")
}

/// Same as [`load_config`] with an explicit config directory, profile and env prefix.
pub fn load_config_from(
    config_dir: &Path,
    run_env: &str,
    env_prefix: &str,
) -> Result<AppConfig, AppConfigError> {
    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&config_dir.join("default").to_string_lossy()).required(false))
        .add_source(File::with_name(&config_dir.join(run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix(env_prefix).separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate_all().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if !app_config.has_mercadopago_credential() {
        warn!("Mercado Pago access token is not configured; checkout requests will fail");
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // Prefix no real environment sets, so only files and defaults apply.
    const TEST_PREFIX: &str = "STOREFRONT_CHECKOUT_CONFIG_TEST";

    fn config_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn defaults_apply_without_files() {
        let dir = config_dir(&[]);
        let config = load_config_from(dir.path(), "development", TEST_PREFIX).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.currency, "BRL");
        assert_eq!(config.max_title_length, 256);
        assert!(config.pix_only);
        assert!(config.diagnostics_enabled());
        assert!(!config.has_mercadopago_credential());
        assert_eq!(
            config.notification_url(),
            "http://localhost:3000/webhooks/payment"
        );
    }

    #[test]
    fn profile_file_overrides_default_file() {
        let dir = config_dir(&[
            (
                "default.toml",
                r#"
                    public_base_url = "https://loja.example.com/"
                    statement_descriptor = "MINHA LOJA"
                "#,
            ),
            (
                "staging.toml",
                r#"
                    port = 9090
                    mercadopago_access_token = "TEST-123"
                "#,
            ),
        ]);

        let config = load_config_from(dir.path(), "staging", TEST_PREFIX).unwrap();
        assert_eq!(config.environment, "staging");
        assert_eq!(config.port, 9090);
        assert_eq!(config.statement_descriptor, "MINHA LOJA");
        assert_eq!(config.base_url(), "https://loja.example.com");
        assert_eq!(
            config.notification_url(),
            "https://loja.example.com/webhooks/payment"
        );
        assert_eq!(config.mercadopago_access_token(), Some("TEST-123"));
    }

    #[test]
    fn production_requires_provider_credential() {
        let dir = config_dir(&[]);
        let result = load_config_from(dir.path(), "production", TEST_PREFIX);
        match result {
            Err(AppConfigError::Validation(errors)) => {
                assert!(errors.field_errors().contains_key("mercadopago_access_token"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = config_dir(&[(
            "default.toml",
            r#"
                currency = "real"
                provider_timeout_secs = 120
                order_store_backend = "postgres"
                log_level = "loud"
            "#,
        )]);

        match load_config_from(dir.path(), "development", TEST_PREFIX) {
            Err(AppConfigError::Validation(errors)) => {
                let fields = errors.field_errors();
                assert!(fields.contains_key("currency"));
                assert!(fields.contains_key("provider_timeout_secs"));
                assert!(fields.contains_key("order_store_backend"));
                assert!(fields.contains_key("log_level"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn sanity_backend_requires_credentials() {
        let config = AppConfig {
            order_store_backend: "sanity".into(),
            sanity_project_id: Some("abc123".into()),
            ..AppConfig::default()
        };
        let errors = config.validate_all().unwrap_err();
        assert!(errors.field_errors().contains_key("sanity_token"));
        assert!(!errors.field_errors().contains_key("sanity_project_id"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = AppConfig {
            mercadopago_access_token: Some("APP_USR-very-secret".into()),
            sanity_token: Some("sk-also-secret".into()),
            ..AppConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("also-secret"));
        assert!(rendered.contains("has_mercadopago_access_token: true"));
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = AppConfig {
            cors_allowed_origins: Some(" https://a.example , ,https://b.example".into()),
            ..AppConfig::default()
        };
        assert_eq!(
            config.cors_origins(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
