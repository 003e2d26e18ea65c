//! SQLite Store Implementation
//!
//! Timestamps are stored as epoch milliseconds; statuses and flow actions as
//! their text names. Each session owns one pooled connection for the length
//! of a tick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::{
    AuditLog, BlockRecord, Customer, NewAuditLog, NewNotification, Notification, Transaction,
    TransactionFlow, TransactionStatus,
};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::session::{SessionFactory, StoreSession};
use crate::{Result, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,
    current_party_user_id TEXT NOT NULL,
    initiator_user_id TEXT NOT NULL,
    updated_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);

CREATE TABLE IF NOT EXISTS transaction_flows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    action_date INTEGER NOT NULL,
    can_return INTEGER NOT NULL DEFAULT 0,
    from_user_id TEXT NOT NULL,
    to_user_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transaction_flows_transaction ON transaction_flows(transaction_id);

CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_number TEXT NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS block_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL,
    blocked_by_user_id TEXT NOT NULL,
    scheduled_unblock_date INTEGER,
    actual_unblock_date INTEGER
);
CREATE INDEX IF NOT EXISTS idx_block_records_scheduled ON block_records(scheduled_unblock_date);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_user_id TEXT NOT NULL,
    to_user_id TEXT NOT NULL,
    subject TEXT NOT NULL,
    message TEXT NOT NULL,
    link TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_to_user ON notifications(to_user_id);

CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    action TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
"#;

/// SQLite-backed session factory
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Initialized SQLite timer schema");
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for SqliteStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(SqliteSession { conn }))
    }
}

pub struct SqliteSession {
    conn: PoolConnection<Sqlite>,
}

fn millis_to_datetime(table: &'static str, column: &str, value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| StoreError::CorruptRow {
        table,
        reason: format!("invalid {} timestamp {}", column, value),
    })
}

fn optional_datetime(
    table: &'static str,
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    let value: Option<i64> = row.try_get(column)?;
    value.map(|v| millis_to_datetime(table, column, v)).transpose()
}

fn required_datetime(table: &'static str, row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: i64 = row.try_get(column)?;
    millis_to_datetime(table, column, value)
}

fn parse_transaction(row: &SqliteRow) -> Result<Transaction> {
    let status: String = row.try_get("status")?;
    let status = status.parse().map_err(|e: ops_common::UnknownValue| StoreError::CorruptRow {
        table: "transactions",
        reason: e.to_string(),
    })?;

    Ok(Transaction {
        id: row.try_get("id")?,
        status,
        current_party_user_id: row.try_get("current_party_user_id")?,
        initiator_user_id: row.try_get("initiator_user_id")?,
        updated_at: optional_datetime("transactions", row, "updated_at")?,
    })
}

fn parse_flow(row: &SqliteRow) -> Result<TransactionFlow> {
    let action: String = row.try_get("action")?;
    let action = action.parse().map_err(|e: ops_common::UnknownValue| StoreError::CorruptRow {
        table: "transaction_flows",
        reason: e.to_string(),
    })?;

    Ok(TransactionFlow {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        action,
        action_date: required_datetime("transaction_flows", row, "action_date")?,
        can_return: row.try_get("can_return")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
    })
}

fn parse_block(row: &SqliteRow) -> Result<BlockRecord> {
    Ok(BlockRecord {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        blocked_by_user_id: row.try_get("blocked_by_user_id")?,
        scheduled_unblock_date: optional_datetime("block_records", row, "scheduled_unblock_date")?,
        actual_unblock_date: optional_datetime("block_records", row, "actual_unblock_date")?,
    })
}

fn parse_notification(row: &SqliteRow) -> Result<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        subject: row.try_get("subject")?,
        message: row.try_get("message")?,
        link: row.try_get("link")?,
        is_read: row.try_get("is_read")?,
        created_at: required_datetime("notifications", row, "created_at")?,
    })
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn transactions_with_status(
        &mut self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT id, status, current_party_user_id, initiator_user_id, updated_at \
             FROM transactions WHERE status = ? ORDER BY id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&mut *self.conn)
        .await?;

        let transactions = rows.iter().map(parse_transaction).collect::<Result<Vec<_>>>()?;
        debug!(status = %status, count = transactions.len(), "Fetched transactions");
        Ok(transactions)
    }

    async fn flows_for_transaction(&mut self, transaction_id: i64) -> Result<Vec<TransactionFlow>> {
        let rows = sqlx::query(
            "SELECT id, transaction_id, action, action_date, can_return, from_user_id, to_user_id \
             FROM transaction_flows WHERE transaction_id = ? ORDER BY action_date ASC, id ASC",
        )
        .bind(transaction_id)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter().map(parse_flow).collect()
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transactions \
             SET status = ?, current_party_user_id = ?, initiator_user_id = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(transaction.status.as_str())
        .bind(&transaction.current_party_user_id)
        .bind(&transaction.initiator_user_id)
        .bind(transaction.updated_at.map(|t| t.timestamp_millis()))
        .bind(transaction.id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "transactions", id: transaction.id });
        }
        Ok(())
    }

    async fn update_flow(&mut self, flow: &TransactionFlow) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transaction_flows \
             SET action = ?, action_date = ?, can_return = ?, from_user_id = ?, to_user_id = ? \
             WHERE id = ?",
        )
        .bind(flow.action.as_str())
        .bind(flow.action_date.timestamp_millis())
        .bind(flow.can_return)
        .bind(&flow.from_user_id)
        .bind(&flow.to_user_id)
        .bind(flow.id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "transaction_flows", id: flow.id });
        }
        Ok(())
    }

    async fn overdue_block_records(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockRecord>> {
        let rows = sqlx::query(
            "SELECT id, customer_id, blocked_by_user_id, \
                    scheduled_unblock_date, actual_unblock_date \
             FROM block_records \
             WHERE scheduled_unblock_date IS NOT NULL \
               AND scheduled_unblock_date < ? \
               AND actual_unblock_date IS NULL \
             ORDER BY scheduled_unblock_date ASC, id ASC",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&mut *self.conn)
        .await?;

        let blocks = rows.iter().map(parse_block).collect::<Result<Vec<_>>>()?;
        debug!(count = blocks.len(), "Fetched overdue block records");
        Ok(blocks)
    }

    async fn find_customer(&mut self, customer_id: i64) -> Result<Option<Customer>> {
        let row = sqlx::query("SELECT id, customer_number, name FROM customers WHERE id = ?")
            .bind(customer_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(|row| {
            Ok(Customer {
                id: row.try_get("id")?,
                customer_number: row.try_get("customer_number")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn insert_notification(
        &mut self,
        notification: &NewNotification,
    ) -> Result<Notification> {
        let result = sqlx::query(
            "INSERT INTO notifications \
             (from_user_id, to_user_id, subject, message, link, is_read, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&notification.from_user_id)
        .bind(&notification.to_user_id)
        .bind(&notification.subject)
        .bind(&notification.message)
        .bind(&notification.link)
        .bind(notification.created_at.timestamp_millis())
        .execute(&mut *self.conn)
        .await?;

        Ok(notification.clone().into_notification(result.last_insert_rowid()))
    }

    async fn notifications_for_user(
        &mut self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let query = if unread_only {
            "SELECT id, from_user_id, to_user_id, subject, message, link, is_read, created_at \
             FROM notifications WHERE to_user_id = ? AND is_read = 0 \
             ORDER BY created_at DESC, id DESC"
        } else {
            "SELECT id, from_user_id, to_user_id, subject, message, link, is_read, created_at \
             FROM notifications WHERE to_user_id = ? ORDER BY created_at DESC, id DESC"
        };

        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.iter().map(parse_notification).collect()
    }

    async fn mark_notification_read(&mut self, notification_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(notification_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> Result<AuditLog> {
        let result =
            sqlx::query("INSERT INTO audit_logs (user_id, action, timestamp) VALUES (?, ?, ?)")
            .bind(&entry.user_id)
            .bind(&entry.action)
            .bind(entry.timestamp.timestamp_millis())
            .execute(&mut *self.conn)
            .await?;

        Ok(AuditLog {
            id: result.last_insert_rowid(),
            user_id: entry.user_id.clone(),
            action: entry.action.clone(),
            timestamp: entry.timestamp,
        })
    }
}
