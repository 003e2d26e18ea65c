//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "ops.toml",
    "./config/config.toml",
    "./config/ops.toml",
    "/etc/ops/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with a custom variable source.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup)? {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Result<Option<PathBuf>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // An explicitly requested file must exist
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::ValidationError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        if let Some(path) = lookup("OPS_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!(?path, "OPS_CONFIG points to a missing file, searching default paths");
        }

        Ok(CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, target: &mut T) {
    if let Some(val) = lookup(key) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}

fn apply_overrides<F: Fn(&str) -> Option<String>>(config: &mut AppConfig, lookup: &F) {
    // HTTP
    parse_into(lookup, "OPS_HTTP_PORT", &mut config.http.port);
    if let Some(val) = lookup("OPS_HTTP_HOST") {
        config.http.host = val;
    }

    // Database
    if let Some(val) = lookup("OPS_DATABASE_KIND") {
        config.database.kind = val;
    }
    if let Some(val) = lookup("OPS_DATABASE_URL") {
        config.database.url = val;
    }
    parse_into(lookup, "OPS_DATABASE_MAX_CONNECTIONS", &mut config.database.max_connections);
    parse_into(lookup, "OPS_DATABASE_INIT_SCHEMA", &mut config.database.init_schema);

    // Scheduler
    let scheduler = &mut config.scheduler;
    parse_into(lookup, "OPS_SCHEDULER_ENABLED", &mut scheduler.enabled);
    if let Some(val) = lookup("OPS_SCHEDULER_SYSTEM_USER_ID") {
        scheduler.system_user_id = val;
    }
    parse_into(lookup, "OPS_HEARTBEAT_ENABLED", &mut scheduler.heartbeat.enabled);
    parse_into(lookup, "OPS_HEARTBEAT_INTERVAL_MINUTES", &mut scheduler.heartbeat.interval_minutes);
    parse_into(lookup, "OPS_ESCALATION_ENABLED", &mut scheduler.escalation.enabled);
    parse_into(
        lookup,
        "OPS_ESCALATION_INTERVAL_MINUTES",
        &mut scheduler.escalation.interval_minutes,
    );
    parse_into(
        lookup,
        "OPS_ESCALATION_RETURN_AFTER_MINUTES",
        &mut scheduler.escalation.return_after_minutes,
    );
    parse_into(lookup, "OPS_REMINDER_ENABLED", &mut scheduler.reminder.enabled);
    parse_into(lookup, "OPS_REMINDER_INTERVAL_MINUTES", &mut scheduler.reminder.interval_minutes);
    if let Some(val) = lookup("OPS_REMINDER_LOCALE") {
        scheduler.reminder.locale = val;
    }
    if let Some(val) = lookup("OPS_REMINDER_LINK_TEMPLATE") {
        scheduler.reminder.link_template = val;
    }

    // Notifications
    parse_into(
        lookup,
        "OPS_NOTIFICATIONS_CHANNEL_CAPACITY",
        &mut config.notifications.channel_capacity,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [http]
            port = 9100

            [scheduler.reminder]
            locale = "en"
            "#
        )
        .unwrap();

        let config = ConfigLoader::with_path(file.path())
            .load_with(|_| None)
            .unwrap();

        assert_eq!(config.http.port, 9100);
        assert_eq!(config.scheduler.reminder.locale, "en");
        assert_eq!(config.scheduler.escalation.interval_minutes, 30);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = ConfigLoader::with_path("/definitely/not/here.toml").load_with(|_| None);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler.escalation]\nreturn_after_minutes = 120").unwrap();

        let env = vars(&[
            ("OPS_ESCALATION_RETURN_AFTER_MINUTES", "60"),
            ("OPS_DATABASE_KIND", "memory"),
            ("OPS_HEARTBEAT_ENABLED", "false"),
        ]);
        let config = ConfigLoader::with_path(file.path())
            .load_with(|key| env.get(key).cloned())
            .unwrap();

        assert_eq!(config.scheduler.escalation.return_after_minutes, 60);
        assert_eq!(config.database.kind, "memory");
        assert!(!config.scheduler.heartbeat.enabled);
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 9000").unwrap();

        let env = vars(&[("OPS_HTTP_PORT", "not-a-port")]);
        let config = ConfigLoader::with_path(file.path())
            .load_with(|key| env.get(key).cloned())
            .unwrap();

        assert_eq!(config.http.port, 9000);
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 9000").unwrap();

        let env = vars(&[("OPS_REMINDER_INTERVAL_MINUTES", "0")]);
        let result = ConfigLoader::with_path(file.path()).load_with(|key| env.get(key).cloned());

        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http\nport = ").unwrap();

        let result = ConfigLoader::with_path(file.path()).load_with(|_| None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
