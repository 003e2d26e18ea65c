//! Unblock reminder - nudges whoever blocked a customer to perform the
//! scheduled unblock.
//!
//! Every overdue block record that is still blocked produces a new
//! notification on every run until it is unblocked.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::{BlockRecord, Customer, NewNotification};
use ops_notify::NotificationDispatcher;
use ops_store::SessionFactory;
use thiserror::Error;
use tracing::{info, warn};

use crate::{Result, TimerTask};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    En,
    Ar,
}

#[derive(Error, Debug)]
#[error("Unsupported locale '{0}'")]
pub struct UnknownLocale(pub String);

impl FromStr for Locale {
    type Err = UnknownLocale;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "ar" => Ok(Self::Ar),
            _ => Err(UnknownLocale(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReminderTemplate {
    locale: Locale,
    link_template: String,
}

impl ReminderTemplate {
    pub fn new(locale: Locale, link_template: impl Into<String>) -> Self {
        Self {
            locale,
            link_template: link_template.into(),
        }
    }

    pub fn subject(&self) -> &'static str {
        match self.locale {
            Locale::En => "Scheduled unblock reminder",
            Locale::Ar => "تذكير بفك الحظر المجدول",
        }
    }

    pub fn message(&self, customer: &Customer, scheduled: DateTime<Utc>) -> String {
        let date = scheduled.format(DATE_FORMAT);
        let number = &customer.customer_number;
        match self.locale {
            Locale::En => format!(
                "Customer {number} was scheduled to be unblocked on {date}. \
                 Please perform the unblock."
            ),
            Locale::Ar => format!(
                "حان موعد فك الحظر عن العميل رقم {number} بتاريخ {date}. يرجى تنفيذ فك الحظر."
            ),
        }
    }

    pub fn link(&self, customer_id: i64) -> String {
        self.link_template.replace("{customer_id}", &customer_id.to_string())
    }

    pub fn build(
        &self,
        block: &BlockRecord,
        customer: &Customer,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> NewNotification {
        NewNotification {
            from_user_id: block.blocked_by_user_id.clone(),
            to_user_id: block.blocked_by_user_id.clone(),
            subject: self.subject().to_string(),
            message: self.message(customer, scheduled),
            link: self.link(block.customer_id),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub overdue: usize,
    pub sent: usize,
    pub skipped_missing_customer: usize,
    pub broadcast_failures: usize,
}

impl fmt::Display for ReminderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "overdue={} sent={} skipped_missing_customer={} broadcast_failures={}",
            self.overdue, self.sent, self.skipped_missing_customer, self.broadcast_failures
        )
    }
}

#[derive(Clone)]
pub struct UnblockReminder {
    factory: Arc<dyn SessionFactory>,
    dispatcher: NotificationDispatcher,
    template: ReminderTemplate,
}

impl UnblockReminder {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        dispatcher: NotificationDispatcher,
        template: ReminderTemplate,
    ) -> Self {
        Self {
            factory,
            dispatcher,
            template,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReminderReport> {
        let mut session = self.factory.open_session().await?;
        let overdue = session.overdue_block_records(now).await?;

        let mut report = ReminderReport {
            overdue: overdue.len(),
            ..Default::default()
        };

        for block in overdue {
            let Some(scheduled) = block.scheduled_unblock_date else {
                continue;
            };

            let Some(customer) = session.find_customer(block.customer_id).await? else {
                warn!(
                    block_id = block.id,
                    customer_id = block.customer_id,
                    "Customer for overdue block not found, skipping reminder"
                );
                report.skipped_missing_customer += 1;
                continue;
            };

            let notification = self.template.build(&block, &customer, scheduled, now);
            let delivery = self.dispatcher.dispatch(session.as_mut(), notification).await?;

            report.sent += 1;
            if delivery.delivered_to.is_none() {
                report.broadcast_failures += 1;
            }
            metrics::counter!("reminder.notifications_sent_total").increment(1);
            info!(
                block_id = block.id,
                customer_number = %customer.customer_number,
                to_user_id = %delivery.notification.to_user_id,
                notification_id = delivery.notification.id,
                "Unblock reminder sent"
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl TimerTask for UnblockReminder {
    fn name(&self) -> &'static str {
        "unblock-reminder"
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<String> {
        Ok(self.run(now).await?.to_string())
    }
}
