use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClaimId, PayoutId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
    PendingRetry,
    Escalated,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PendingRetry => "pending_retry",
            Self::Escalated => "escalated",
        }
    }

    /// Statuses the automatic retry sweep picks up.
    pub const RETRYABLE: [PayoutStatus; 2] = [PayoutStatus::Failed, PayoutStatus::PendingRetry];
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "pending_retry" => Ok(Self::PendingRetry),
            "escalated" => Ok(Self::Escalated),
            _ => Err(format!("Invalid payout status: {}", s)),
        }
    }
}

/// Which external operation failed, and therefore which retry strategy applies.
///
/// The legacy processor-specific names are still accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    #[default]
    #[serde(alias = "stripe_payout")]
    PaymentExecution,
    #[serde(alias = "sendgrid_notification")]
    NotificationDelivery,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentExecution => "payment_execution",
            Self::NotificationDelivery => "notification_delivery",
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_execution" | "stripe_payout" => Ok(Self::PaymentExecution),
            "notification_delivery" | "sendgrid_notification" => Ok(Self::NotificationDelivery),
            _ => Err(format!("Invalid failure type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub id: PayoutId,
    pub claim_id: ClaimId,
    pub status: PayoutStatus,
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub customer_ref: String,
    /// Reused verbatim on every retry so the processor can deduplicate.
    pub idempotency_key: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub failure_type: FailureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notification_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_currency() -> String {
    "usd".to_string()
}

impl Payout {
    pub fn new(
        id: impl Into<PayoutId>,
        claim_id: impl Into<ClaimId>,
        status: PayoutStatus,
        amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        let idempotency_key = format!("payout-{}", id);
        Self {
            id,
            claim_id: claim_id.into(),
            status,
            amount_cents,
            currency: default_currency(),
            customer_ref: String::new(),
            idempotency_key,
            retry_count: 0,
            failure_type: FailureType::default(),
            last_error: None,
            last_retry_at: None,
            escalated_at: None,
            escalated_reason: None,
            transaction_id: None,
            completed_at: None,
            notification_sent: false,
            notification_sent_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_failure_type(mut self, failure_type: FailureType) -> Self {
        self.failure_type = failure_type;
        self
    }

    pub fn with_customer_ref(mut self, customer_ref: &str) -> Self {
        self.customer_ref = customer_ref.to_string();
        self
    }

    pub fn with_last_error(mut self, error: &str) -> Self {
        self.last_error = Some(error.to_string());
        self
    }
}
