use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::warn;

use super::{Notification, format_amount};

const SLACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack-compatible incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SLACK_TIMEOUT)
            .build()
            .context("Failed to build chat webhook client")?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
        })
    }

    pub async fn post(&self, notification: &Notification) -> bool {
        let payload = payload(notification);
        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "Chat webhook rejected notification");
                false
            }
            Err(e) => {
                warn!(error = %e, "Chat webhook request failed");
                false
            }
        }
    }
}

fn field(label: &str, value: impl std::fmt::Display) -> Value {
    json!({ "type": "mrkdwn", "text": format!("*{}:*\n{}", label, value) })
}

pub(crate) fn payload(notification: &Notification) -> Value {
    match notification {
        Notification::PayoutEscalation {
            payout_id,
            claim_id,
            amount_cents,
            currency,
            retry_count,
            failure_type,
            last_error,
        } => json!({
            "text": "*Payout Escalation Required*",
            "blocks": [
                { "type": "header", "text": { "type": "plain_text", "text": "Payout Escalation" } },
                {
                    "type": "section",
                    "fields": [
                        field("Payout ID", payout_id),
                        field("Claim ID", claim_id),
                        field("Amount", format_amount(*amount_cents, currency)),
                        field("Retry Count", retry_count),
                        field("Failure Type", failure_type),
                        field("Last Error", last_error.as_deref().unwrap_or("Unknown")),
                    ]
                },
                {
                    "type": "context",
                    "elements": [
                        { "type": "mrkdwn", "text": "Manual intervention required. Check admin dashboard." }
                    ]
                }
            ]
        }),
        Notification::RunSummary(report) => json!({
            "text": "*Claims Reconciliation Summary*",
            "blocks": [
                { "type": "header", "text": { "type": "plain_text", "text": "Claims Reconciliation Summary" } },
                {
                    "type": "section",
                    "fields": [
                        field("Locks Cleared", report.expired_locks_cleared),
                        field("States Fixed", report.state_fixes()),
                        field("Retries", report.failed_operations_retried),
                        field("Successful Retries", report.successful_retries),
                        field("Escalated", report.escalated_to_admin),
                        field("Errors", report.errors.len()),
                    ]
                },
                {
                    "type": "context",
                    "elements": [
                        { "type": "mrkdwn", "text": format!("Run {} ({} ms)", report.run_id, report.duration_ms) }
                    ]
                }
            ]
        }),
        other => json!({ "text": other.text() }),
    }
}
