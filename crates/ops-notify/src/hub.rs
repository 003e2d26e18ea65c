//! In-process notification hub backed by a tokio broadcast channel.
//!
//! Connected clients subscribe and receive every event sent after they
//! subscribed. There is no replay: a client that connects late or lags past
//! the channel capacity misses events.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{NotificationBroadcaster, NotificationEvent, NotifyError};

/// A named event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubMessage {
    pub target: String,
    pub event: NotificationEvent,
}

#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<HubMessage>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.sender.subscribe()
    }

    pub fn connected_clients(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl NotificationBroadcaster for NotificationHub {
    async fn broadcast(
        &self,
        target: &str,
        event: &NotificationEvent,
    ) -> Result<usize, NotifyError> {
        let message = HubMessage {
            target: target.to_string(),
            event: event.clone(),
        };

        // send only fails when nobody is connected, which is not an error here
        match self.sender.send(message) {
            Ok(clients) => {
                debug!(
                    event_target = target,
                    notification_id = event.id,
                    clients,
                    "Notification broadcast"
                );
                Ok(clients)
            }
            Err(_) => {
                debug!(
                    event_target = target,
                    notification_id = event.id,
                    "No connected clients for notification"
                );
                Ok(0)
            }
        }
    }
}
