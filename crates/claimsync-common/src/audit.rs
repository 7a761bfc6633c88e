//! Append-only audit trail entries.
//!
//! Each entry describes exactly one mutation the reconciler (or an operator
//! acting through it) made, so the history can be rebuilt without looking at
//! current claim or payout state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::claim::ClaimStatus;
use crate::ids::{ClaimId, PayoutId};
use crate::payout::FailureType;

/// Who performed an audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Actor {
    System,
    Operator(String),
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        match actor {
            Actor::System => "system".to_string(),
            Actor::Operator(id) => format!("operator:{}", id),
        }
    }
}

impl TryFrom<String> for Actor {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "system" {
            return Ok(Actor::System);
        }
        match s.strip_prefix("operator:") {
            Some(id) if !id.is_empty() => Ok(Actor::Operator(id.to_string())),
            _ => Err(format!("Invalid audit actor: {}", s)),
        }
    }
}

/// Which reconciliation rule triggered a `state_reconciliation` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationRule {
    CompletedPayoutFound,
    StaleSettlingCompleted,
    StaleSettlingFailed,
    OrphanedSettling,
    ExpiredReviewLock,
}

impl ReconciliationRule {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::CompletedPayoutFound => "completed payout found for non-settled claim",
            Self::StaleSettlingCompleted => "stale settling status with completed payout",
            Self::StaleSettlingFailed => "stale settling status with failed payout",
            Self::OrphanedSettling => "orphaned settling status without completed payout",
            Self::ExpiredReviewLock => "review lock expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualRetryOutcome {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    StateReconciliation,
    RetryAttempt,
    RetrySuccess,
    Escalation,
    ManualRetry,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateReconciliation => "state_reconciliation",
            Self::RetryAttempt => "retry_attempt",
            Self::RetrySuccess => "retry_success",
            Self::Escalation => "escalation",
            Self::ManualRetry => "manual_retry",
        }
    }
}

/// Type-specific payload, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditDetail {
    #[serde(rename_all = "camelCase")]
    StateReconciliation {
        rule: ReconciliationRule,
        previous_status: ClaimStatus,
        new_status: ClaimStatus,
    },
    #[serde(rename_all = "camelCase")]
    RetryAttempt {
        retry_count: u32,
        failure_type: FailureType,
        /// Always `"failed"`: successful attempts are `retry_success`.
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RetrySuccess {
        retry_count: u32,
        failure_type: FailureType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Escalation {
        retry_count: u32,
        failure_type: FailureType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
        requires_manual_intervention: bool,
    },
    #[serde(rename_all = "camelCase")]
    ManualRetry { outcome: ManualRetryOutcome },
}

impl AuditDetail {
    pub fn kind(&self) -> AuditKind {
        match self {
            Self::StateReconciliation { .. } => AuditKind::StateReconciliation,
            Self::RetryAttempt { .. } => AuditKind::RetryAttempt,
            Self::RetrySuccess { .. } => AuditKind::RetrySuccess,
            Self::Escalation { .. } => AuditKind::Escalation,
            Self::ManualRetry { .. } => AuditKind::ManualRetry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<ClaimId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<PayoutId>,
    pub reason: String,
    #[serde(flatten)]
    pub detail: AuditDetail,
}

impl AuditEntry {
    pub fn new(timestamp: DateTime<Utc>, actor: Actor, reason: impl Into<String>, detail: AuditDetail) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            actor,
            claim_id: None,
            payout_id: None,
            reason: reason.into(),
            detail,
        }
    }

    pub fn for_claim(mut self, claim_id: &ClaimId) -> Self {
        self.claim_id = Some(claim_id.clone());
        self
    }

    pub fn for_payout(mut self, payout_id: &PayoutId) -> Self {
        self.payout_id = Some(payout_id.clone());
        self
    }

    pub fn kind(&self) -> AuditKind {
        self.detail.kind()
    }
}
