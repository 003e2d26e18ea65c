//! Audit heartbeat

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::{AuditLog, NewAuditLog};
use ops_store::SessionFactory;
use tracing::debug;

use crate::{Result, TimerTask};

pub const HEARTBEAT_ACTION: &str = "EscalationTimerHeartbeat";

#[derive(Clone)]
pub struct AuditHeartbeat {
    factory: Arc<dyn SessionFactory>,
    user_id: String,
}

impl AuditHeartbeat {
    pub fn new(factory: Arc<dyn SessionFactory>, user_id: impl Into<String>) -> Self {
        Self {
            factory,
            user_id: user_id.into(),
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<AuditLog> {
        let mut session = self.factory.open_session().await?;
        let log = session
            .insert_audit_log(&NewAuditLog {
                user_id: self.user_id.clone(),
                action: HEARTBEAT_ACTION.to_string(),
                timestamp: now,
            })
            .await?;

        debug!(audit_log_id = log.id, "Heartbeat recorded");
        Ok(log)
    }
}

#[async_trait]
impl TimerTask for AuditHeartbeat {
    fn name(&self) -> &'static str {
        "audit-heartbeat"
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<String> {
        let log = self.run(now).await?;
        Ok(format!("audit_log_id={}", log.id))
    }
}
