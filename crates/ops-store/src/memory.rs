//! In-memory store
//!
//! Used by the server when `database.kind = "memory"` and by tests. Sessions
//! share the store's state. Individual operations can be made to fail to
//! exercise error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::{
    AuditLog, BlockRecord, Customer, NewAuditLog, NewNotification, Notification, Transaction,
    TransactionFlow, TransactionStatus,
};
use parking_lot::Mutex;

use crate::session::{SessionFactory, StoreSession};
use crate::{Result, StoreError};

/// Store operations that can be targeted by failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    OpenSession,
    ListTransactions,
    LoadFlows,
    UpdateTransaction,
    UpdateFlow,
    ListOverdueBlocks,
    FindCustomer,
    InsertNotification,
    QueryNotifications,
    MarkNotificationRead,
    InsertAuditLog,
}

#[derive(Default)]
struct MemoryState {
    transactions: BTreeMap<i64, Transaction>,
    flows: BTreeMap<i64, TransactionFlow>,
    customers: BTreeMap<i64, Customer>,
    blocks: BTreeMap<i64, BlockRecord>,
    notifications: BTreeMap<i64, Notification>,
    audit_logs: Vec<AuditLog>,
    next_id: i64,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Remaining failures per operation; `None` fails forever
type FaultTable = HashMap<StoreOperation, Option<u32>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Mutex<FaultTable>>,
    sessions_opened: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Failure injection
    // ========================================================================

    /// Fail every call to `operation` until [`clear_failures`](Self::clear_failures)
    pub fn fail_always(&self, operation: StoreOperation) {
        self.faults.lock().insert(operation, None);
    }

    /// Fail the next `times` calls to `operation`
    pub fn fail_times(&self, operation: StoreOperation, times: u32) {
        let mut faults = self.faults.lock();
        if times == 0 {
            faults.remove(&operation);
        } else {
            faults.insert(operation, Some(times));
        }
    }

    pub fn clear_failures(&self) {
        self.faults.lock().clear();
    }

    fn check(&self, operation: StoreOperation) -> Result<()> {
        let mut faults = self.faults.lock();
        let exhausted = match faults.get_mut(&operation) {
            None => return Ok(()),
            Some(None) => false,
            Some(Some(remaining)) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
        };
        if exhausted {
            faults.remove(&operation);
        }
        Err(StoreError::Unavailable(format!("{:?} failed", operation)))
    }

    // ========================================================================
    // Seeding & inspection
    // ========================================================================

    pub fn insert_transaction(&self, transaction: Transaction) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(transaction.id);
        state.transactions.insert(transaction.id, transaction);
    }

    pub fn insert_flow(&self, flow: TransactionFlow) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(flow.id);
        state.flows.insert(flow.id, flow);
    }

    pub fn insert_customer(&self, customer: Customer) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(customer.id);
        state.customers.insert(customer.id, customer);
    }

    pub fn insert_block(&self, block: BlockRecord) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(block.id);
        state.blocks.insert(block.id, block);
    }

    /// Record that a block was lifted; returns false for unknown blocks
    pub fn set_actual_unblock_date(&self, block_id: i64, date: DateTime<Utc>) -> bool {
        match self.state.lock().blocks.get_mut(&block_id) {
            Some(block) => {
                block.actual_unblock_date = Some(date);
                true
            }
            None => false,
        }
    }

    pub fn transaction(&self, id: i64) -> Option<Transaction> {
        self.state.lock().transactions.get(&id).cloned()
    }

    pub fn flow(&self, id: i64) -> Option<TransactionFlow> {
        self.state.lock().flows.get(&id).cloned()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.values().cloned().collect()
    }

    pub fn audit_logs(&self) -> Vec<AuditLog> {
        self.state.lock().audit_logs.clone()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MemoryStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>> {
        self.check(StoreOperation::OpenSession)?;
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession { store: self.clone() }))
    }
}

pub struct MemorySession {
    store: MemoryStore,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn transactions_with_status(
        &mut self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>> {
        self.store.check(StoreOperation::ListTransactions)?;
        let state = self.store.state.lock();
        Ok(state
            .transactions
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn flows_for_transaction(&mut self, transaction_id: i64) -> Result<Vec<TransactionFlow>> {
        self.store.check(StoreOperation::LoadFlows)?;
        let state = self.store.state.lock();
        let mut flows: Vec<TransactionFlow> = state
            .flows
            .values()
            .filter(|f| f.transaction_id == transaction_id)
            .cloned()
            .collect();
        flows.sort_by_key(|f| (f.action_date, f.id));
        Ok(flows)
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.store.check(StoreOperation::UpdateTransaction)?;
        let mut state = self.store.state.lock();
        match state.transactions.get_mut(&transaction.id) {
            Some(existing) => {
                *existing = transaction.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound { table: "transactions", id: transaction.id }),
        }
    }

    async fn update_flow(&mut self, flow: &TransactionFlow) -> Result<()> {
        self.store.check(StoreOperation::UpdateFlow)?;
        let mut state = self.store.state.lock();
        match state.flows.get_mut(&flow.id) {
            Some(existing) => {
                *existing = flow.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound { table: "transaction_flows", id: flow.id }),
        }
    }

    async fn overdue_block_records(&mut self, now: DateTime<Utc>) -> Result<Vec<BlockRecord>> {
        self.store.check(StoreOperation::ListOverdueBlocks)?;
        let state = self.store.state.lock();
        let mut blocks: Vec<BlockRecord> = state
            .blocks
            .values()
            .filter(|b| b.is_overdue(now))
            .cloned()
            .collect();
        blocks.sort_by_key(|b| (b.scheduled_unblock_date, b.id));
        Ok(blocks)
    }

    async fn find_customer(&mut self, customer_id: i64) -> Result<Option<Customer>> {
        self.store.check(StoreOperation::FindCustomer)?;
        Ok(self.store.state.lock().customers.get(&customer_id).cloned())
    }

    async fn insert_notification(
        &mut self,
        notification: &NewNotification,
    ) -> Result<Notification> {
        self.store.check(StoreOperation::InsertNotification)?;
        let mut state = self.store.state.lock();
        let id = state.allocate_id();
        let stored = notification.clone().into_notification(id);
        state.notifications.insert(id, stored.clone());
        Ok(stored)
    }

    async fn notifications_for_user(
        &mut self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        self.store.check(StoreOperation::QueryNotifications)?;
        let state = self.store.state.lock();
        let mut notifications: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.to_user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(notifications)
    }

    async fn mark_notification_read(&mut self, notification_id: i64) -> Result<bool> {
        self.store.check(StoreOperation::MarkNotificationRead)?;
        let mut state = self.store.state.lock();
        match state.notifications.get_mut(&notification_id) {
            Some(notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> Result<AuditLog> {
        self.store.check(StoreOperation::InsertAuditLog)?;
        let mut state = self.store.state.lock();
        let log = AuditLog {
            id: state.allocate_id(),
            user_id: entry.user_id.clone(),
            action: entry.action.clone(),
            timestamp: entry.timestamp,
        };
        state.audit_logs.push(log.clone());
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit_entry() -> NewAuditLog {
        NewAuditLog {
            user_id: "system".to_string(),
            action: "EscalationTimerHeartbeat".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fail_times_recovers() {
        let store = MemoryStore::new();
        store.fail_times(StoreOperation::InsertAuditLog, 2);

        let mut session = store.open_session().await.unwrap();
        assert!(session.insert_audit_log(&audit_entry()).await.is_err());
        assert!(session.insert_audit_log(&audit_entry()).await.is_err());
        assert!(session.insert_audit_log(&audit_entry()).await.is_ok());
        assert_eq!(store.audit_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_always_until_cleared() {
        let store = MemoryStore::new();
        store.fail_always(StoreOperation::OpenSession);

        assert!(store.open_session().await.is_err());
        assert!(store.open_session().await.is_err());
        assert_eq!(store.sessions_opened(), 0);

        store.clear_failures();
        assert!(store.open_session().await.is_ok());
        assert_eq!(store.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_ids_do_not_collide_with_seeded_rows() {
        let store = MemoryStore::new();
        store.insert_customer(Customer {
            id: 40,
            customer_number: "C-40".to_string(),
            name: "Seeded".to_string(),
        });

        let mut session = store.open_session().await.unwrap();
        let log = session.insert_audit_log(&audit_entry()).await.unwrap();
        assert_eq!(log.id, 41);
    }
}
