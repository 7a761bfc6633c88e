use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClaimId, OwnerId};

/// Authoritative lifecycle state of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Processing,
    Settling,
    Settled,
    Denied,
    Escalated,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Settling => "settling",
            Self::Settled => "settled",
            Self::Denied => "denied",
            Self::Escalated => "escalated",
        }
    }

    /// Statuses in which a claim is still waiting on its payout.
    pub const AWAITING_PAYOUT: [ClaimStatus; 2] = [ClaimStatus::Processing, ClaimStatus::Settling];

    pub fn is_awaiting_payout(&self) -> bool {
        Self::AWAITING_PAYOUT.contains(self)
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "settling" => Ok(Self::Settling),
            "settled" => Ok(Self::Settled),
            "denied" => Ok(Self::Denied),
            "escalated" => Ok(Self::Escalated),
            _ => Err(format!("Invalid claim status: {}", s)),
        }
    }
}

/// Advisory lock a human reviewer takes while looking at a claim.
///
/// It carries no ownership semantics: once older than the lock TTL anyone may
/// clear it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLock {
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
}

impl ReviewLock {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.locked_at < now - ttl
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: ClaimId,
    pub owner_id: OwnerId,
    pub status: ClaimStatus,
    pub claim_amount_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciled_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_lock: Option<ReviewLock>,
}

impl Claim {
    pub fn new(
        id: impl Into<ClaimId>,
        owner_id: impl Into<OwnerId>,
        status: ClaimStatus,
        claim_amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            status,
            claim_amount_cents,
            created_at: at,
            updated_at: at,
            settled_at: None,
            reconciled_at: None,
            reconciled_reason: None,
            review_lock: None,
        }
    }

    pub fn with_review_lock(mut self, locked_by: &str, locked_at: DateTime<Utc>) -> Self {
        self.review_lock = Some(ReviewLock {
            locked_by: locked_by.to_string(),
            locked_at,
        });
        self
    }
}
