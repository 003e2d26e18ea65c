//! Timer Service Configuration
//!
//! TOML-based configuration with environment variable override support.
//! Load order: defaults, then the first config file found, then `OPS_*`
//! environment variables, then validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Locales the reminder templates are available in
pub const SUPPORTED_LOCALES: &[&str] = &["en", "ar"];

/// Upper bound for any interval or threshold, one year in minutes
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Store backends the server knows how to open
pub const SUPPORTED_DATABASE_KINDS: &[&str] = &["sqlite", "memory"];

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
}

/// HTTP server configuration (health, metrics, notification stream)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Persistence store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend: `sqlite` or `memory`
    pub kind: String,
    pub url: String,
    pub max_connections: u32,
    /// Create tables on startup if they do not exist
    pub init_schema: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            url: "sqlite://./data/ops.db?mode=rwc".to_string(),
            max_connections: 5,
            init_schema: true,
        }
    }
}

/// Escalation/reminder timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// User id recorded on heartbeat audit rows
    pub system_user_id: String,
    pub heartbeat: HeartbeatConfig,
    pub escalation: EscalationConfig,
    pub reminder: ReminderConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            system_user_id: "system".to_string(),
            heartbeat: HeartbeatConfig::default(),
            escalation: EscalationConfig::default(),
            reminder: ReminderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 100,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        minutes(self.interval_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    /// Age after which an open escalation is handed back to the initiator
    pub return_after_minutes: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 30,
            return_after_minutes: 4 * 60,
        }
    }
}

impl EscalationConfig {
    pub fn interval(&self) -> Duration {
        minutes(self.interval_minutes)
    }

    pub fn return_after(&self) -> Duration {
        minutes(self.return_after_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    /// Template language: `en` or `ar`
    pub locale: String,
    /// Deep link to the unblock action; `{customer_id}` is substituted
    pub link_template: String,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 240,
            locale: "ar".to_string(),
            link_template: "/blocking/unblock/{customer_id}".to_string(),
        }
    }
}

impl ReminderConfig {
    pub fn interval(&self) -> Duration {
        minutes(self.interval_minutes)
    }
}

/// Real-time notification channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Events buffered per subscriber before a slow client starts missing them
    pub channel_capacity: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

fn minutes(value: u64) -> Duration {
    value.checked_mul(60).map_or(Duration::MAX, Duration::from_secs)
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject configurations the timer service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        let intervals = [
            ("scheduler.heartbeat.interval_minutes", scheduler.heartbeat.interval_minutes),
            ("scheduler.escalation.interval_minutes", scheduler.escalation.interval_minutes),
            (
                "scheduler.escalation.return_after_minutes",
                scheduler.escalation.return_after_minutes,
            ),
            ("scheduler.reminder.interval_minutes", scheduler.reminder.interval_minutes),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
            if value > MAX_INTERVAL_MINUTES {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be at most {} minutes",
                    key, MAX_INTERVAL_MINUTES
                )));
            }
        }

        if !SUPPORTED_LOCALES.contains(&scheduler.reminder.locale.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "scheduler.reminder.locale '{}' is not one of {:?}",
                scheduler.reminder.locale, SUPPORTED_LOCALES
            )));
        }

        if scheduler.reminder.link_template.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "scheduler.reminder.link_template must not be empty".to_string(),
            ));
        }

        if scheduler.system_user_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "scheduler.system_user_id must not be empty".to_string(),
            ));
        }

        if !SUPPORTED_DATABASE_KINDS.contains(&self.database.kind.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "database.kind '{}' is not one of {:?}",
                self.database.kind, SUPPORTED_DATABASE_KINDS
            )));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }

        if self.notifications.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "notifications.channel_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Escalation/Reminder Timer Service Configuration
# Environment variables (OPS_*) override these settings

[http]
port = 8085
host = "0.0.0.0"

[database]
kind = "sqlite"  # sqlite or memory
url = "sqlite://./data/ops.db?mode=rwc"
max_connections = 5
init_schema = true

[scheduler]
enabled = true
system_user_id = "system"

[scheduler.heartbeat]
enabled = true
interval_minutes = 100

[scheduler.escalation]
enabled = true
interval_minutes = 30
return_after_minutes = 240

[scheduler.reminder]
enabled = true
interval_minutes = 240
locale = "ar"  # ar or en
link_template = "/blocking/unblock/{customer_id}"

[notifications]
channel_capacity = 256
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_timer_policy() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.heartbeat.interval(), Duration::from_secs(100 * 60));
        assert_eq!(config.scheduler.escalation.interval(), Duration::from_secs(30 * 60));
        assert_eq!(config.scheduler.escalation.return_after(), Duration::from_secs(4 * 3600));
        assert_eq!(config.scheduler.reminder.interval(), Duration::from_secs(240 * 60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_toml_parses_to_defaults() {
        let parsed: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(parsed.http.port, defaults.http.port);
        assert_eq!(parsed.database.url, defaults.database.url);
        assert_eq!(
            parsed.scheduler.reminder.link_template,
            defaults.scheduler.reminder.link_template
        );
        assert_eq!(parsed.scheduler.escalation.return_after_minutes, 240);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [scheduler.escalation]
            return_after_minutes = 60
            "#,
        )
        .unwrap();
        assert_eq!(parsed.scheduler.escalation.return_after_minutes, 60);
        assert_eq!(parsed.scheduler.escalation.interval_minutes, 30);
        assert!(parsed.scheduler.heartbeat.enabled);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.reminder.interval_minutes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheduler.reminder.interval_minutes"));
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.escalation.interval_minutes = u64::MAX / 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheduler.escalation.interval_minutes"));

        let mut config = AppConfig::default();
        config.scheduler.escalation.return_after_minutes = MAX_INTERVAL_MINUTES + 1;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.scheduler.escalation.return_after_minutes = MAX_INTERVAL_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_conversion_does_not_overflow() {
        let mut config = AppConfig::default();
        config.scheduler.heartbeat.interval_minutes = u64::MAX;
        assert_eq!(config.scheduler.heartbeat.interval(), Duration::MAX);
    }

    #[test]
    fn test_unknown_locale_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.reminder.locale = "fr".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_unknown_database_kind_rejected() {
        let mut config = AppConfig::default();
        config.database.kind = "oracle".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }
}
