//! Outbound notifications: operator alerts and customer payout notices.
//!
//! Delivery is fire-and-forget. `Notifier::send` reports success as a bool and
//! never returns an error; callers decide whether a failed delivery matters.

use async_trait::async_trait;
use tracing::debug;

use claimsync_common::{ClaimId, FailureType, PayoutId};

use crate::config::NotificationsSection;
use crate::reconcile::report::RunReport;

pub mod email;
pub mod slack;

pub use email::EmailNotifier;
pub use slack::SlackNotifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// The operators' chat webhook.
    Chat,
    Email { to: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PayoutEscalation {
        payout_id: PayoutId,
        claim_id: ClaimId,
        amount_cents: i64,
        currency: String,
        retry_count: u32,
        failure_type: FailureType,
        last_error: Option<String>,
    },
    RunSummary(Box<RunReport>),
    /// Sent to the policy holder once their payout went through.
    PayoutProcessed {
        claim_id: ClaimId,
        owner_name: String,
        amount_cents: i64,
        currency: String,
    },
}

pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let cents = amount_cents.unsigned_abs();
    format!(
        "{} {}{}.{:02}",
        currency.to_uppercase(),
        sign,
        cents / 100,
        cents % 100
    )
}

impl Notification {
    pub fn subject(&self) -> String {
        match self {
            Self::PayoutEscalation { claim_id, .. } => format!("Payout Escalation - {}", claim_id),
            Self::RunSummary(_) => "Claims Reconciliation Summary".to_string(),
            Self::PayoutProcessed { claim_id, .. } => {
                format!("Payment Processed - Claim {}", claim_id)
            }
        }
    }

    /// Plain-text body, one fact per line.
    pub fn text(&self) -> String {
        match self {
            Self::PayoutEscalation {
                payout_id,
                claim_id,
                amount_cents,
                currency,
                retry_count,
                failure_type,
                last_error,
            } => format!(
                "Payout escalation required\n\
                 Payout ID: {}\n\
                 Claim ID: {}\n\
                 Amount: {}\n\
                 Retry Count: {}\n\
                 Failure Type: {}\n\
                 Last Error: {}\n\
                 Manual intervention required.",
                payout_id,
                claim_id,
                format_amount(*amount_cents, currency),
                retry_count,
                failure_type,
                last_error.as_deref().unwrap_or("Unknown"),
            ),
            Self::RunSummary(report) => format!(
                "Claims reconciliation ({}) finished in {} ms\n{}",
                report.trigger,
                report.duration_ms,
                report.summary_line()
            ),
            Self::PayoutProcessed {
                claim_id,
                owner_name,
                amount_cents,
                currency,
            } => format!(
                "Hello {},\n\n\
                 Your claim payout has been processed successfully.\n\
                 Claim ID: {}\n\
                 Amount: {}\n\
                 The payment should appear in your account within 5-7 business days.",
                owner_name,
                claim_id,
                format_amount(*amount_cents, currency),
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &Channel, notification: &Notification) -> bool;
}

/// Dispatches each channel to its configured transport. Channels without a
/// transport report `false`.
#[derive(Default)]
pub struct NotificationRouter {
    chat: Option<SlackNotifier>,
    email: Option<EmailNotifier>,
}

impl NotificationRouter {
    pub fn new(chat: Option<SlackNotifier>, email: Option<EmailNotifier>) -> Self {
        Self { chat, email }
    }

    pub fn from_config(section: &NotificationsSection) -> anyhow::Result<Self> {
        let chat = section
            .slack_webhook_url
            .as_deref()
            .map(SlackNotifier::new)
            .transpose()?;
        let email = match section.sendgrid_api_key.as_deref() {
            Some(key) => Some(EmailNotifier::new(
                &section.sendgrid_api_base,
                key,
                &section.from_email,
            )?),
            None => None,
        };
        Ok(Self::new(chat, email))
    }
}

#[async_trait]
impl Notifier for NotificationRouter {
    async fn send(&self, channel: &Channel, notification: &Notification) -> bool {
        match channel {
            Channel::Chat => match &self.chat {
                Some(chat) => chat.post(notification).await,
                None => {
                    debug!("Chat channel not configured, dropping notification");
                    false
                }
            },
            Channel::Email { to } => match &self.email {
                Some(email) => email.send_to(to, notification).await,
                None => {
                    debug!(to = %to, "Email channel not configured, dropping notification");
                    false
                }
            },
        }
    }
}
