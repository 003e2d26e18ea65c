//! Persist-then-broadcast notification dispatcher

use std::sync::Arc;

use ops_common::{NewNotification, Notification};
use ops_store::StoreSession;
use tracing::{debug, warn};

use crate::{NotificationBroadcaster, NotificationEvent, NotifyError, RECEIVE_NOTIFICATION};

/// Outcome of one dispatch
#[derive(Debug, Clone)]
pub struct Delivery {
    pub notification: Notification,
    /// Clients the event was handed to; `None` when the broadcast failed
    pub delivered_to: Option<usize>,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    broadcaster: Arc<dyn NotificationBroadcaster>,
}

impl NotificationDispatcher {
    pub fn new(broadcaster: Arc<dyn NotificationBroadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Persist `notification` through `session`, then push it to connected clients.
    ///
    /// Only a persistence failure is returned as an error.
    pub async fn dispatch(
        &self,
        session: &mut dyn StoreSession,
        notification: NewNotification,
    ) -> Result<Delivery, NotifyError> {
        let stored = session.insert_notification(&notification).await?;
        metrics::counter!("notifications.persisted_total").increment(1);

        let event = NotificationEvent::from(&stored);
        let delivered_to = match self.broadcaster.broadcast(RECEIVE_NOTIFICATION, &event).await {
            Ok(clients) => {
                debug!(
                    notification_id = stored.id,
                    to_user_id = %stored.to_user_id,
                    clients,
                    "Notification dispatched"
                );
                metrics::counter!("notifications.broadcast_total").increment(1);
                Some(clients)
            }
            Err(e) => {
                warn!(
                    notification_id = stored.id,
                    error = %e,
                    "Broadcast failed, notification remains persisted"
                );
                metrics::counter!("notifications.broadcast_errors_total").increment(1);
                None
            }
        };

        Ok(Delivery {
            notification: stored,
            delivered_to,
        })
    }
}
