use std::path::Path;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Days a message mapping is kept before the retention sweep removes it.
    #[serde(default = "default_mapping_retention_days")]
    pub mapping_retention_days: u32,
    /// Interval between retention sweeps, in seconds.
    #[serde(default = "default_retention_sweep_interval")]
    pub retention_sweep_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mapping_retention_days: default_mapping_retention_days(),
            retention_sweep_interval_secs: default_retention_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub bot_token: String,
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default = "default_use_privileged_intents")]
    pub use_privileged_intents: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranslatorConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Estimated cost billed against the guild ledger per model call.
    #[serde(default = "default_cost_per_request")]
    pub cost_per_request_usd: f64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            request_timeout_secs: default_request_timeout(),
            cost_per_request_usd: default_cost_per_request(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl DatabaseConfig {
    pub fn sqlite_path(&self) -> Option<String> {
        if let Some(ref url) = self.url {
            return url.strip_prefix("sqlite://").map(str::to_string);
        }
        self.filename.clone()
    }
}

/// Process-wide defaults for per-guild operational ceilings. A guild's own
/// settings row overrides these once the guild is initialized.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_daily_requests")]
    pub max_daily_requests: u32,
    #[serde(default = "default_max_monthly_cost")]
    pub max_monthly_cost_usd: f64,
    #[serde(default = "default_cost_alert_threshold")]
    pub cost_alert_threshold_usd: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            max_daily_requests: default_max_daily_requests(),
            max_monthly_cost_usd: default_max_monthly_cost(),
            cost_alert_threshold_usd: default_cost_alert_threshold(),
        }
    }
}

/// Resolved operational ceilings for one guild.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GuildLimits {
    pub requests_per_minute: u32,
    pub max_daily_requests: u32,
    pub max_monthly_cost_usd: f64,
    pub cost_alert_threshold_usd: f64,
}

impl From<&LimitsConfig> for GuildLimits {
    fn from(defaults: &LimitsConfig) -> Self {
        Self {
            requests_per_minute: defaults.requests_per_minute,
            max_daily_requests: defaults.max_daily_requests,
            max_monthly_cost_usd: defaults.max_monthly_cost_usd,
            cost_alert_threshold_usd: defaults.cost_alert_threshold_usd,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_web_bind_address")]
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            port: default_web_port(),
            bind_address: default_web_bind_address(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config_path = path
            .map(str::to_string)
            .or_else(|| std::env::var("CONFIG_PATH").ok())
            .unwrap_or_else(|| "config.yaml".to_string());

        Self::load_from_file(&config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token cannot be empty".to_string(),
            ));
        }

        if self.auth.gemini_api_key.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.gemini_api_key cannot be empty".to_string(),
            ));
        }

        if self.database.sqlite_path().is_none() {
            return Err(ConfigError::InvalidConfig(
                "database.filename or a sqlite:// database.url is required".to_string(),
            ));
        }

        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        if self.limits.cost_alert_threshold_usd > self.limits.max_monthly_cost_usd {
            return Err(ConfigError::InvalidConfig(
                "limits.cost_alert_threshold_usd cannot exceed limits.max_monthly_cost_usd"
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn gemini_api_key(&self) -> SecretString {
        SecretString::from(self.auth.gemini_api_key.clone())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RELAY_AUTH_BOT_TOKEN") {
            self.auth.bot_token = value;
        }
        if let Ok(value) = std::env::var("RELAY_AUTH_GEMINI_API_KEY") {
            self.auth.gemini_api_key = value;
        }
    }
}

fn default_mapping_retention_days() -> u32 {
    30
}

fn default_retention_sweep_interval() -> u64 {
    3600
}

fn default_use_privileged_intents() -> bool {
    false
}

fn default_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_request_timeout() -> u64 {
    20
}

fn default_cost_per_request() -> f64 {
    0.001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_web_enabled() -> bool {
    true
}

fn default_web_port() -> u16 {
    8080
}

fn default_web_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_max_daily_requests() -> u32 {
    1000
}

fn default_max_monthly_cost() -> f64 {
    10.0
}

fn default_cost_alert_threshold() -> f64 {
    8.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
auth:
  bot_token: "token"
  gemini_api_key: "key"
database:
  filename: "relay.db"
"#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");

        assert_eq!(config.relay.mapping_retention_days, 30);
        assert_eq!(config.limits.requests_per_minute, 30);
        assert_eq!(config.translator.model, "gemini-2.5-flash-lite");
        assert_eq!(config.database.sqlite_path().as_deref(), Some("relay.db"));
        assert!(config.web.enabled);
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.web.bind_address, "0.0.0.0");
        config.validate().expect("valid");
    }

    #[test]
    fn sqlite_url_is_accepted() {
        let yaml = r#"
auth:
  bot_token: "token"
  gemini_api_key: "key"
database:
  url: "sqlite:///var/lib/relay.db"
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(
            config.database.sqlite_path().as_deref(),
            Some("/var/lib/relay.db")
        );
    }

    #[test]
    fn empty_bot_token_is_rejected() {
        let yaml = r#"
auth:
  bot_token: ""
  gemini_api_key: "key"
database:
  filename: "relay.db"
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn alert_threshold_above_ceiling_is_rejected() {
        let yaml = r#"
auth:
  bot_token: "token"
  gemini_api_key: "key"
database:
  filename: "relay.db"
limits:
  max_monthly_cost_usd: 5.0
  cost_alert_threshold_usd: 6.0
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("parse");
        assert!(config.validate().is_err());
    }
}
