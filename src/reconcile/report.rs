//! Structured summary of one reconciliation pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use claimsync_common::{ClaimId, PayoutId};

/// What started a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual { operator: String },
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual { operator } => write!(f, "manual ({})", operator),
        }
    }
}

/// A failure recorded during a pass. Document-level failures carry the id of
/// the claim or payout; sub-procedure failures carry neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<ClaimId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<PayoutId>,
    pub operation: String,
    pub error: String,
}

impl RunError {
    pub fn new(operation: &str, error: impl std::fmt::Display) -> Self {
        Self {
            claim_id: None,
            payout_id: None,
            operation: operation.to_string(),
            error: error.to_string(),
        }
    }

    pub fn for_claim(claim_id: &ClaimId, operation: &str, error: impl std::fmt::Display) -> Self {
        Self {
            claim_id: Some(claim_id.clone()),
            ..Self::new(operation, error)
        }
    }

    pub fn for_payout(
        payout_id: &PayoutId,
        operation: &str,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            payout_id: Some(payout_id.clone()),
            ..Self::new(operation, error)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    pub expired_locks_cleared: u32,
    pub mismatched_states_fixed: u32,
    pub stale_settling_fixed: u32,
    pub orphaned_settling_fixed: u32,
    pub failed_operations_retried: u32,
    pub successful_retries: u32,
    pub escalated_to_admin: u32,
    #[serde(default)]
    pub deadline_exceeded: bool,
    #[serde(default)]
    pub errors: Vec<RunError>,
}

impl RunReport {
    pub fn started(trigger: RunTrigger, at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            started_at: at,
            completed_at: None,
            duration_ms: 0,
            expired_locks_cleared: 0,
            mismatched_states_fixed: 0,
            stale_settling_fixed: 0,
            orphaned_settling_fixed: 0,
            failed_operations_retried: 0,
            successful_retries: 0,
            escalated_to_admin: 0,
            deadline_exceeded: false,
            errors: Vec::new(),
        }
    }

    pub fn record_error(&mut self, error: RunError) {
        self.errors.push(error);
    }

    pub fn finish(&mut self, at: DateTime<Utc>, duration_ms: u64) {
        self.completed_at = Some(at);
        self.duration_ms = duration_ms;
    }

    /// Claim status corrections across all three mismatch rules.
    pub fn state_fixes(&self) -> u32 {
        self.mismatched_states_fixed + self.stale_settling_fixed + self.orphaned_settling_fixed
    }

    /// Whether the pass warrants a summary alert to the operators' channel.
    pub fn is_significant(&self, mismatch_threshold: u32) -> bool {
        self.state_fixes() > mismatch_threshold || self.escalated_to_admin > 0
    }

    pub fn summary_line(&self) -> String {
        format!(
            "locks cleared {}, states fixed {} (mismatch {}, stale {}, orphaned {}), \
             retries {} ({} succeeded), escalated {}, errors {}",
            self.expired_locks_cleared,
            self.state_fixes(),
            self.mismatched_states_fixed,
            self.stale_settling_fixed,
            self.orphaned_settling_fixed,
            self.failed_operations_retried,
            self.successful_retries,
            self.escalated_to_admin,
            self.errors.len()
        )
    }
}
