//! Notification Delivery
//!
//! Two decoupled steps:
//! - durable persistence of the notification row through a store session
//! - best-effort fan-out of a `ReceiveNotification` event to connected clients
//!
//! Persistence must succeed before fan-out is attempted. A fan-out failure is
//! logged and never undoes the persisted row.

pub mod dispatcher;
pub mod hub;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::Notification;
use ops_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dispatcher::{Delivery, NotificationDispatcher};
pub use hub::{HubMessage, NotificationHub};

/// Client-side method invoked for every pushed notification
pub const RECEIVE_NOTIFICATION: &str = "ReceiveNotification";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Persisting notification failed: {0}")]
    Persist(#[from] StoreError),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),
}

/// Payload pushed to connected clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationEvent {
    pub id: i64,
    pub subject: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Recipient; clients filter on this since every client receives every event
    pub user_id: String,
}

impl From<&Notification> for NotificationEvent {
    fn from(notification: &Notification) -> Self {
        Self {
            id: notification.id,
            subject: notification.subject.clone(),
            message: notification.message.clone(),
            created_at: notification.created_at,
            user_id: notification.to_user_id.clone(),
        }
    }
}

/// Real-time channel: send a named event to every connected client.
///
/// Delivery is at-most-once with no acknowledgment.
#[async_trait]
pub trait NotificationBroadcaster: Send + Sync {
    /// Returns the number of clients the event was handed to
    async fn broadcast(
        &self,
        target: &str,
        event: &NotificationEvent,
    ) -> Result<usize, NotifyError>;
}
