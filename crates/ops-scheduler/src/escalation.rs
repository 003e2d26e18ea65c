//! Escalation return - hands stale escalations back to the initiator
//!
//! For each escalated transaction the most recent open escalation flow (action
//! Escalated, can_return set) decides. Once it is older than the return
//! threshold the transaction goes back to Pending with the initiator as
//! current party, then the flow row is flipped to Returned. The transaction is
//! written first so a failure between the two writes leaves it returned.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::{TransactionFlow, TransactionStatus};
use ops_store::SessionFactory;
use tracing::{debug, info};

use crate::{Result, SchedulerError, TimerTask};

#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    return_after: chrono::Duration,
}

impl EscalationPolicy {
    pub fn new(return_after: Duration) -> Result<Self> {
        let return_after = chrono::Duration::from_std(return_after).map_err(|_| {
            SchedulerError::Config(format!("return threshold {:?} is out of range", return_after))
        })?;
        Ok(Self { return_after })
    }

    /// Most recent open escalation, by action date then id
    pub fn open_escalation(&self, flows: Vec<TransactionFlow>) -> Option<TransactionFlow> {
        flows
            .into_iter()
            .filter(TransactionFlow::is_open_escalation)
            .max_by_key(|flow| (flow.action_date, flow.id))
    }

    pub fn is_stale(&self, flow: &TransactionFlow, now: DateTime<Utc>) -> bool {
        flow.action_date
            .checked_add_signed(self.return_after)
            .is_some_and(|deadline| deadline < now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationReport {
    pub scanned: usize,
    pub returned: usize,
    pub without_open_escalation: usize,
    pub not_yet_stale: usize,
}

impl fmt::Display for EscalationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} returned={} without_open_escalation={} not_yet_stale={}",
            self.scanned, self.returned, self.without_open_escalation, self.not_yet_stale
        )
    }
}

#[derive(Clone)]
pub struct EscalationChecker {
    factory: Arc<dyn SessionFactory>,
    policy: EscalationPolicy,
}

impl EscalationChecker {
    pub fn new(factory: Arc<dyn SessionFactory>, policy: EscalationPolicy) -> Self {
        Self { factory, policy }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<EscalationReport> {
        let mut session = self.factory.open_session().await?;
        let escalated = session.transactions_with_status(TransactionStatus::Escalated).await?;

        let mut report = EscalationReport {
            scanned: escalated.len(),
            ..Default::default()
        };

        for mut transaction in escalated {
            let flows = session.flows_for_transaction(transaction.id).await?;

            let Some(mut flow) = self.policy.open_escalation(flows) else {
                debug!(transaction_id = transaction.id, "No open escalation flow, skipping");
                report.without_open_escalation += 1;
                continue;
            };

            if !self.policy.is_stale(&flow, now) {
                report.not_yet_stale += 1;
                continue;
            }

            transaction.return_to_initiator(now);
            session.update_transaction(&transaction).await?;

            flow.mark_returned();
            session.update_flow(&flow).await?;

            report.returned += 1;
            metrics::counter!("escalation.transactions_returned_total").increment(1);
            info!(
                transaction_id = transaction.id,
                flow_id = flow.id,
                initiator = %transaction.initiator_user_id,
                escalated_at = %flow.action_date,
                "Returned stale escalation to initiator"
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl TimerTask for EscalationChecker {
    fn name(&self) -> &'static str {
        "escalation-check"
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<String> {
        Ok(self.run(now).await?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_common::FlowAction;

    fn flow(
        id: i64,
        action: FlowAction,
        action_date: DateTime<Utc>,
        can_return: bool,
    ) -> TransactionFlow {
        TransactionFlow {
            id,
            transaction_id: 1,
            action,
            action_date,
            can_return,
            from_user_id: "teller".to_string(),
            to_user_id: "manager".to_string(),
        }
    }

    #[test]
    fn test_open_escalation_picks_most_recent() {
        let policy = EscalationPolicy::new(Duration::from_secs(4 * 3600)).unwrap();
        let now = Utc::now();
        let flows = vec![
            flow(1, FlowAction::Escalated, now - chrono::Duration::hours(8), true),
            flow(2, FlowAction::Escalated, now - chrono::Duration::hours(1), true),
            flow(3, FlowAction::Submitted, now, true),
            flow(4, FlowAction::Escalated, now, false),
        ];

        assert_eq!(policy.open_escalation(flows).unwrap().id, 2);
    }

    #[test]
    fn test_open_escalation_ties_break_on_id() {
        let policy = EscalationPolicy::new(Duration::from_secs(4 * 3600)).unwrap();
        let at = Utc::now();
        let flows = vec![
            flow(9, FlowAction::Escalated, at, true),
            flow(5, FlowAction::Escalated, at, true),
        ];

        assert_eq!(policy.open_escalation(flows).unwrap().id, 9);
    }

    #[test]
    fn test_no_open_escalation() {
        let policy = EscalationPolicy::new(Duration::from_secs(4 * 3600)).unwrap();
        let now = Utc::now();
        let flows = vec![
            flow(1, FlowAction::Returned, now, false),
            flow(2, FlowAction::Approved, now, true),
        ];

        assert!(policy.open_escalation(flows).is_none());
        assert!(policy.open_escalation(Vec::new()).is_none());
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        assert!(matches!(EscalationPolicy::new(Duration::MAX), Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_staleness_threshold_is_strict() {
        let policy = EscalationPolicy::new(Duration::from_secs(4 * 3600)).unwrap();
        let now = Utc::now();

        let escalated_hours_ago =
            |hours| flow(1, FlowAction::Escalated, now - chrono::Duration::hours(hours), true);

        assert!(policy.is_stale(&escalated_hours_ago(5), now));
        assert!(!policy.is_stale(&escalated_hours_ago(2), now));
        assert!(!policy.is_stale(&escalated_hours_ago(4), now));
    }
}
