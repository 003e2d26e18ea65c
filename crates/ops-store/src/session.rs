//! Session contract consumed by the timer tasks and the notification queries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::{
    AuditLog, BlockRecord, Customer, NewAuditLog, NewNotification, Notification, Transaction,
    TransactionFlow, TransactionStatus,
};

use crate::Result;

/// Produces a fresh session per unit of work.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>>;
}

/// A short-lived persistence session. Dropping it releases its resources.
#[async_trait]
pub trait StoreSession: Send {
    // ========================================================================
    // Escalations
    // ========================================================================

    async fn transactions_with_status(
        &mut self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>>;

    /// Flow history for one transaction, oldest first
    async fn flows_for_transaction(&mut self, transaction_id: i64) -> Result<Vec<TransactionFlow>>;

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    async fn update_flow(&mut self, flow: &TransactionFlow) -> Result<()>;

    // ========================================================================
    // Blocking
    // ========================================================================

    /// Block records whose scheduled unblock date is before `now` and that
    /// have not been unblocked yet
    async fn overdue_block_records(&mut self, now: DateTime<Utc>) -> Result<Vec<BlockRecord>>;

    async fn find_customer(&mut self, customer_id: i64) -> Result<Option<Customer>>;

    // ========================================================================
    // Notifications & Audit
    // ========================================================================

    async fn insert_notification(&mut self, notification: &NewNotification) -> Result<Notification>;

    /// Notifications addressed to `user_id`, newest first
    async fn notifications_for_user(
        &mut self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>>;

    /// Returns false when no such notification exists
    async fn mark_notification_read(&mut self, notification_id: i64) -> Result<bool>;

    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> Result<AuditLog>;
}
