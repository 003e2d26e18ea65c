use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod logging;

/// Raised when a stored status/action string does not map to a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Escalated,
    Approved,
    Rejected,
    Returned,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Escalated => "Escalated",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Returned => "Returned",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Escalated" => Ok(Self::Escalated),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            "Returned" => Ok(Self::Returned),
            other => Err(UnknownValue { kind: "transaction status", value: other.to_string() }),
        }
    }
}

/// A business transaction moving between parties for decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub status: TransactionStatus,
    pub current_party_user_id: String,
    pub initiator_user_id: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Hand control back to the original submitter.
    pub fn return_to_initiator(&mut self, now: DateTime<Utc>) {
        self.status = TransactionStatus::Pending;
        self.current_party_user_id = self.initiator_user_id.clone();
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowAction {
    Submitted,
    Escalated,
    Returned,
    Approved,
    Rejected,
}

impl FlowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Escalated => "Escalated",
            Self::Returned => "Returned",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowAction {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Submitted" => Ok(Self::Submitted),
            "Escalated" => Ok(Self::Escalated),
            "Returned" => Ok(Self::Returned),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            other => Err(UnknownValue { kind: "flow action", value: other.to_string() }),
        }
    }
}

/// One audit-trail step taken on a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFlow {
    pub id: i64,
    pub transaction_id: i64,
    pub action: FlowAction,
    pub action_date: DateTime<Utc>,
    /// Whether this step may still be reversed automatically
    pub can_return: bool,
    pub from_user_id: String,
    pub to_user_id: String,
}

impl TransactionFlow {
    pub fn is_open_escalation(&self) -> bool {
        self.action == FlowAction::Escalated && self.can_return
    }

    pub fn mark_returned(&mut self) {
        self.action = FlowAction::Returned;
        self.can_return = false;
    }
}

// ============================================================================
// Blocking
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    /// Human-facing customer identifier shown to operators
    pub customer_number: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub id: i64,
    pub customer_id: i64,
    pub blocked_by_user_id: String,
    pub scheduled_unblock_date: Option<DateTime<Utc>>,
    /// None until someone actually lifts the block
    pub actual_unblock_date: Option<DateTime<Utc>>,
}

impl BlockRecord {
    /// Scheduled unblock date has passed but the block is still in place.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.actual_unblock_date.is_none()
            && self.scheduled_unblock_date.is_some_and(|scheduled| scheduled < now)
    }
}

// ============================================================================
// Notifications & Audit
// ============================================================================

/// A notification that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub from_user_id: String,
    pub to_user_id: String,
    pub subject: String,
    pub message: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn into_notification(self, id: i64) -> Notification {
        Notification {
            id,
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            subject: self.subject,
            message: self.message,
            link: self.link,
            is_read: false,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub from_user_id: String,
    pub to_user_id: String,
    pub subject: String,
    pub message: String,
    pub link: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditLog {
    pub user_id: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: i64,
    pub user_id: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Escalated,
            TransactionStatus::Approved,
            TransactionStatus::Rejected,
            TransactionStatus::Returned,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "Archived".parse::<TransactionStatus>().unwrap_err();
        assert_eq!(err.kind, "transaction status");
        assert_eq!(err.value, "Archived");
    }

    #[test]
    fn test_return_to_initiator() {
        let now = Utc::now();
        let mut tx = Transaction {
            id: 1,
            status: TransactionStatus::Escalated,
            current_party_user_id: "manager".to_string(),
            initiator_user_id: "teller".to_string(),
            updated_at: None,
        };

        tx.return_to_initiator(now);

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.current_party_user_id, "teller");
        assert_eq!(tx.updated_at, Some(now));
    }

    #[test]
    fn test_flow_open_escalation() {
        let mut flow = TransactionFlow {
            id: 7,
            transaction_id: 1,
            action: FlowAction::Escalated,
            action_date: Utc::now(),
            can_return: true,
            from_user_id: "teller".to_string(),
            to_user_id: "manager".to_string(),
        };
        assert!(flow.is_open_escalation());

        flow.mark_returned();
        assert_eq!(flow.action, FlowAction::Returned);
        assert!(!flow.can_return);
        assert!(!flow.is_open_escalation());
    }

    #[test]
    fn test_block_overdue() {
        let now = Utc::now();
        let mut block = BlockRecord {
            id: 1,
            customer_id: 10,
            blocked_by_user_id: "officer".to_string(),
            scheduled_unblock_date: Some(now - Duration::hours(1)),
            actual_unblock_date: None,
        };
        assert!(block.is_overdue(now));

        block.actual_unblock_date = Some(now);
        assert!(!block.is_overdue(now));

        block.actual_unblock_date = None;
        block.scheduled_unblock_date = Some(now + Duration::hours(1));
        assert!(!block.is_overdue(now));

        block.scheduled_unblock_date = None;
        assert!(!block.is_overdue(now));
    }

    #[test]
    fn test_notification_serializes_camel_case() {
        let notification = NewNotification {
            from_user_id: "a".to_string(),
            to_user_id: "b".to_string(),
            subject: "s".to_string(),
            message: "m".to_string(),
            link: "/x".to_string(),
            created_at: Utc::now(),
        }
        .into_notification(5);

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["id"], 5);
        assert_eq!(json["toUserId"], "b");
        assert_eq!(json["isRead"], false);
    }
}
