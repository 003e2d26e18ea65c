//! Escalation Timer Service
//!
//! Three independent periodic tasks:
//! - AuditHeartbeat: writes an audit row proving the service is alive
//! - EscalationChecker: hands stale escalations back to their initiator
//! - UnblockReminder: reminds users of scheduled unblocks they have not performed
//!
//! EscalationTimerService drives them, each on its own interval, each tick in
//! its own task and its own store session.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_notify::NotifyError;
use ops_store::StoreError;
use thiserror::Error;

pub mod escalation;
pub mod heartbeat;
pub mod reminder;
pub mod service;

pub use escalation::{EscalationChecker, EscalationPolicy, EscalationReport};
pub use heartbeat::{AuditHeartbeat, HEARTBEAT_ACTION};
pub use reminder::{Locale, ReminderReport, ReminderTemplate, UnblockReminder, UnknownLocale};
pub use service::{EscalationTimerService, TaskStatus};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tick aborted: {0}")]
    TickAborted(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// One periodic unit of work
#[async_trait]
pub trait TimerTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run once; the returned summary is logged and kept in the task status
    async fn tick(&self, now: DateTime<Utc>) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSchedule {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub enabled: bool,
    pub heartbeat: TaskSchedule,
    pub escalation: TaskSchedule,
    pub reminder: TaskSchedule,
    /// Age after which an open escalation is returned
    pub return_after: Duration,
    /// User id written on heartbeat rows
    pub system_user_id: String,
    pub locale: Locale,
    pub link_template: String,
    /// How long `stop` waits for a running tick before abandoning its timer
    pub shutdown_grace: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat: TaskSchedule { enabled: true, interval: Duration::from_secs(100 * 60) },
            escalation: TaskSchedule { enabled: true, interval: Duration::from_secs(30 * 60) },
            reminder: TaskSchedule { enabled: true, interval: Duration::from_secs(240 * 60) },
            return_after: Duration::from_secs(4 * 60 * 60),
            system_user_id: "system".to_string(),
            locale: Locale::Ar,
            link_template: "/blocking/unblock/{customer_id}".to_string(),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl TimerConfig {
    pub fn from_config(config: &ops_config::SchedulerConfig) -> Result<Self> {
        let locale = config
            .reminder
            .locale
            .parse::<Locale>()
            .map_err(|e: UnknownLocale| SchedulerError::Config(e.to_string()))?;

        Ok(Self {
            enabled: config.enabled,
            heartbeat: TaskSchedule {
                enabled: config.heartbeat.enabled,
                interval: config.heartbeat.interval(),
            },
            escalation: TaskSchedule {
                enabled: config.escalation.enabled,
                interval: config.escalation.interval(),
            },
            reminder: TaskSchedule {
                enabled: config.reminder.enabled,
                interval: config.reminder.interval(),
            },
            return_after: config.escalation.return_after(),
            system_user_id: config.system_user_id.clone(),
            locale,
            link_template: config.reminder.link_template.clone(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_config_from_app_config() {
        let mut config = ops_config::SchedulerConfig::default();
        config.reminder.locale = "en".to_string();
        config.escalation.return_after_minutes = 90;
        config.heartbeat.enabled = false;

        let timer = TimerConfig::from_config(&config).unwrap();
        assert_eq!(timer.locale, Locale::En);
        assert_eq!(timer.return_after, Duration::from_secs(90 * 60));
        assert!(!timer.heartbeat.enabled);
        assert_eq!(timer.reminder.interval, Duration::from_secs(240 * 60));
    }

    #[test]
    fn test_timer_config_rejects_unknown_locale() {
        let mut config = ops_config::SchedulerConfig::default();
        config.reminder.locale = "xx".to_string();
        assert!(matches!(TimerConfig::from_config(&config), Err(SchedulerError::Config(_))));
    }
}
