//! Entity store abstraction over claims, payouts, owners, the audit trail and
//! reconciliation run reports.
//!
//! The reconciler depends only on [`EntityStore`]. Two implementations ship:
//!
//! | Module   | Backing                                              |
//! |----------|------------------------------------------------------|
//! | `memory` | `HashMap`s behind a mutex; tests and dry runs        |
//! | `sqlite` | SQLite via `DbHandle` (blocking pool + `Arc<Mutex>`) |
//!
//! Writes are single-entity and optionally conditional: `update_claim` and
//! `update_payout` take the statuses the caller last observed and report
//! `false` when the document has moved on, which callers treat as a lost
//! race rather than an error.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use claimsync_common::{
    AuditEntry, AuditKind, Claim, ClaimId, ClaimStatus, Owner, OwnerId, Payout, PayoutId,
    PayoutStatus,
};

use crate::reconcile::report::RunReport;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{DbHandle, SqliteStore};

/// Predicate for claim queries. Empty `statuses` matches every status.
#[derive(Debug, Clone, Default)]
pub struct ClaimFilter {
    pub statuses: Vec<ClaimStatus>,
    pub updated_before: Option<DateTime<Utc>>,
    pub review_locked_before: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl ClaimFilter {
    pub fn with_statuses(statuses: &[ClaimStatus], limit: usize) -> Self {
        Self {
            statuses: statuses.to_vec(),
            limit,
            ..Default::default()
        }
    }

    pub fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    pub fn review_locked_before(cutoff: DateTime<Utc>, limit: usize) -> Self {
        Self {
            review_locked_before: Some(cutoff),
            limit,
            ..Default::default()
        }
    }

    pub fn matches(&self, claim: &Claim) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&claim.status) {
            return false;
        }
        if let Some(cutoff) = self.updated_before
            && claim.updated_at >= cutoff
        {
            return false;
        }
        if let Some(cutoff) = self.review_locked_before {
            match &claim.review_lock {
                Some(lock) if lock.locked_at < cutoff => {}
                _ => return false,
            }
        }
        true
    }
}

/// Predicate for payout queries. Results are newest-first by `createdAt`
/// when `newest_first` is set, otherwise oldest-first.
#[derive(Debug, Clone, Default)]
pub struct PayoutFilter {
    pub claim_id: Option<ClaimId>,
    pub statuses: Vec<PayoutStatus>,
    pub newest_first: bool,
    pub limit: usize,
}

impl PayoutFilter {
    pub fn with_statuses(statuses: &[PayoutStatus], limit: usize) -> Self {
        Self {
            statuses: statuses.to_vec(),
            limit,
            ..Default::default()
        }
    }

    pub fn for_claim(claim_id: &ClaimId) -> Self {
        Self {
            claim_id: Some(claim_id.clone()),
            limit: 1,
            ..Default::default()
        }
    }

    pub fn status(mut self, status: PayoutStatus) -> Self {
        self.statuses = vec![status];
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn matches(&self, payout: &Payout) -> bool {
        if let Some(ref claim_id) = self.claim_id
            && &payout.claim_id != claim_id
        {
            return false;
        }
        self.statuses.is_empty() || self.statuses.contains(&payout.status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub claim_id: Option<ClaimId>,
    pub payout_id: Option<PayoutId>,
    pub kind: Option<AuditKind>,
    pub limit: usize,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref id) = self.claim_id
            && entry.claim_id.as_ref() != Some(id)
        {
            return false;
        }
        if let Some(ref id) = self.payout_id
            && entry.payout_id.as_ref() != Some(id)
        {
            return false;
        }
        self.kind.is_none_or(|kind| entry.kind() == kind)
    }
}

/// Field-level claim update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimPatch {
    pub status: Option<ClaimStatus>,
    pub settled_at: Option<DateTime<Utc>>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_reason: Option<String>,
    pub clear_review_lock: bool,
}

impl ClaimPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, claim: &mut Claim, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            claim.status = status;
        }
        if let Some(at) = self.settled_at {
            claim.settled_at = Some(at);
        }
        if let Some(at) = self.reconciled_at {
            claim.reconciled_at = Some(at);
        }
        if let Some(ref reason) = self.reconciled_reason {
            claim.reconciled_reason = Some(reason.clone());
        }
        if self.clear_review_lock {
            claim.review_lock = None;
        }
        claim.updated_at = now;
    }
}

/// Field-level payout update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutPatch {
    pub status: Option<PayoutStatus>,
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalated_reason: Option<String>,
    pub transaction_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notification_sent_at: Option<DateTime<Utc>>,
}

impl PayoutPatch {
    pub fn apply(&self, payout: &mut Payout, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            payout.status = status;
        }
        if let Some(count) = self.retry_count {
            payout.retry_count = count;
        }
        if let Some(ref error) = self.last_error {
            payout.last_error = Some(error.clone());
        }
        if let Some(at) = self.last_retry_at {
            payout.last_retry_at = Some(at);
        }
        if let Some(at) = self.escalated_at {
            payout.escalated_at = Some(at);
        }
        if let Some(ref reason) = self.escalated_reason {
            payout.escalated_reason = Some(reason.clone());
        }
        if let Some(ref tx) = self.transaction_id {
            payout.transaction_id = Some(tx.clone());
        }
        if let Some(at) = self.completed_at {
            payout.completed_at = Some(at);
        }
        if let Some(at) = self.notification_sent_at {
            payout.notification_sent = true;
            payout.notification_sent_at = Some(at);
        }
        payout.updated_at = now;
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn claims(&self, filter: ClaimFilter) -> Result<Vec<Claim>>;

    async fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>>;

    /// Apply `patch` if the claim's status is one of `expected` (or
    /// unconditionally when `expected` is empty). Returns whether it applied.
    async fn update_claim(
        &self,
        id: &ClaimId,
        expected: &[ClaimStatus],
        patch: ClaimPatch,
    ) -> Result<bool>;

    /// Batched lock release. Only claims whose lock is still older than
    /// `locked_before` are touched; returns the ids actually cleared.
    /// `updatedAt` is not bumped.
    async fn clear_review_locks(
        &self,
        ids: &[ClaimId],
        locked_before: DateTime<Utc>,
    ) -> Result<Vec<ClaimId>>;

    async fn payouts(&self, filter: PayoutFilter) -> Result<Vec<Payout>>;

    async fn get_payout(&self, id: &PayoutId) -> Result<Option<Payout>>;

    async fn update_payout(
        &self,
        id: &PayoutId,
        expected: &[PayoutStatus],
        patch: PayoutPatch,
    ) -> Result<bool>;

    async fn get_owner(&self, id: &OwnerId) -> Result<Option<Owner>>;

    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;

    async fn audit_entries(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>>;

    async fn save_run_report(&self, report: &RunReport) -> Result<()>;

    /// Most recent first.
    async fn recent_run_reports(&self, limit: usize) -> Result<Vec<RunReport>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn claim_filter_requires_lock_older_than_cutoff() {
        let now = at();
        let filter = ClaimFilter::review_locked_before(now - Duration::minutes(10), 10);
        let locked = Claim::new("c1", "o1", ClaimStatus::Processing, 100, now)
            .with_review_lock("adjuster", now - Duration::minutes(11));
        let fresh = Claim::new("c2", "o1", ClaimStatus::Processing, 100, now)
            .with_review_lock("adjuster", now - Duration::minutes(9));
        let unlocked = Claim::new("c3", "o1", ClaimStatus::Processing, 100, now);
        assert!(filter.matches(&locked));
        assert!(!filter.matches(&fresh));
        assert!(!filter.matches(&unlocked));
    }

    #[test]
    fn claim_filter_combines_status_and_staleness() {
        let now = at();
        let filter = ClaimFilter::with_statuses(&[ClaimStatus::Settling], 10)
            .updated_before(now - Duration::minutes(15));
        let mut stale = Claim::new("c1", "o1", ClaimStatus::Settling, 100, now);
        stale.updated_at = now - Duration::minutes(16);
        let mut recent = stale.clone();
        recent.updated_at = now - Duration::minutes(5);
        let mut other = stale.clone();
        other.status = ClaimStatus::Processing;
        assert!(filter.matches(&stale));
        assert!(!filter.matches(&recent));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn claim_patch_clears_lock_and_stamps_updated_at() {
        let now = at();
        let mut claim = Claim::new("c1", "o1", ClaimStatus::Processing, 100, now - Duration::hours(1))
            .with_review_lock("adjuster", now - Duration::hours(1));
        let patch = ClaimPatch {
            clear_review_lock: true,
            ..Default::default()
        };
        patch.apply(&mut claim, now);
        assert!(claim.review_lock.is_none());
        assert_eq!(claim.updated_at, now);
        assert_eq!(claim.status, ClaimStatus::Processing);
        assert!(ClaimPatch::default().is_empty());
    }

    #[test]
    fn payout_patch_notification_sets_flag() {
        let now = at();
        let mut payout = Payout::new("p1", "c1", PayoutStatus::Failed, 100, now);
        PayoutPatch {
            notification_sent_at: Some(now),
            ..Default::default()
        }
        .apply(&mut payout, now);
        assert!(payout.notification_sent);
        assert_eq!(payout.notification_sent_at, Some(now));
    }
}
