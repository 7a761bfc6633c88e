use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use claimsync_common::{
    AuditEntry, Claim, ClaimId, ClaimStatus, Clock, Owner, OwnerId, Payout, PayoutId,
    PayoutStatus, SystemClock,
};

use super::{AuditFilter, ClaimFilter, ClaimPatch, EntityStore, PayoutFilter, PayoutPatch};
use crate::reconcile::report::RunReport;

#[derive(Default)]
struct Collections {
    claims: HashMap<ClaimId, Claim>,
    payouts: HashMap<PayoutId, Payout>,
    owners: HashMap<OwnerId, Owner>,
    audit: Vec<AuditEntry>,
    reports: Vec<RunReport>,
    mutations: usize,
    failing_claims: HashSet<ClaimId>,
    failing_claim_writes: HashSet<ClaimId>,
    failing_payouts: HashSet<PayoutId>,
}

/// In-process store. Also supports fault injection so callers can exercise
/// per-document failure handling.
pub struct MemoryStore {
    inner: Mutex<Collections>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Collections::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_claim(&self, claim: Claim) {
        self.lock().claims.insert(claim.id.clone(), claim);
    }

    pub fn insert_payout(&self, payout: Payout) {
        self.lock().payouts.insert(payout.id.clone(), payout);
    }

    pub fn insert_owner(&self, owner: Owner) {
        self.lock().owners.insert(owner.id.clone(), owner);
    }

    pub fn claim(&self, id: &str) -> Option<Claim> {
        self.lock().claims.get(&ClaimId::new(id)).cloned()
    }

    pub fn payout(&self, id: &str) -> Option<Payout> {
        self.lock().payouts.get(&PayoutId::new(id)).cloned()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.lock().audit.clone()
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.lock().reports.clone()
    }

    /// Number of claim/payout writes that actually changed a document.
    pub fn mutation_count(&self) -> usize {
        self.lock().mutations
    }

    /// Make every read or write of this claim fail.
    pub fn fail_claim(&self, id: &str) {
        self.lock().failing_claims.insert(ClaimId::new(id));
    }

    /// Make writes to this claim fail while reads still succeed.
    pub fn fail_claim_writes(&self, id: &str) {
        self.lock().failing_claim_writes.insert(ClaimId::new(id));
    }

    /// Make every read or write of this payout fail.
    pub fn fail_payout(&self, id: &str) {
        self.lock().failing_payouts.insert(PayoutId::new(id));
    }

    fn check_claim(inner: &Collections, id: &ClaimId) -> Result<()> {
        if inner.failing_claims.contains(id) {
            return Err(anyhow!("injected store failure for claim {}", id));
        }
        Ok(())
    }

    fn check_payout(inner: &Collections, id: &PayoutId) -> Result<()> {
        if inner.failing_payouts.contains(id) {
            return Err(anyhow!("injected store failure for payout {}", id));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn claims(&self, filter: ClaimFilter) -> Result<Vec<Claim>> {
        let inner = self.lock();
        let mut claims: Vec<Claim> = inner
            .claims
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        claims.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        claims.truncate(filter.limit);
        Ok(claims)
    }

    async fn get_claim(&self, id: &ClaimId) -> Result<Option<Claim>> {
        let inner = self.lock();
        Self::check_claim(&inner, id)?;
        Ok(inner.claims.get(id).cloned())
    }

    async fn update_claim(
        &self,
        id: &ClaimId,
        expected: &[ClaimStatus],
        patch: ClaimPatch,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.lock();
        Self::check_claim(&inner, id)?;
        if inner.failing_claim_writes.contains(id) {
            return Err(anyhow!("injected write failure for claim {}", id));
        }
        let Some(claim) = inner.claims.get_mut(id) else {
            return Ok(false);
        };
        if !expected.is_empty() && !expected.contains(&claim.status) {
            return Ok(false);
        }
        patch.apply(claim, now);
        inner.mutations += 1;
        Ok(true)
    }

    async fn clear_review_locks(
        &self,
        ids: &[ClaimId],
        locked_before: DateTime<Utc>,
    ) -> Result<Vec<ClaimId>> {
        let mut inner = self.lock();
        for id in ids {
            Self::check_claim(&inner, id)?;
        }
        let mut cleared = Vec::new();
        for id in ids {
            if let Some(claim) = inner.claims.get_mut(id)
                && claim
                    .review_lock
                    .as_ref()
                    .is_some_and(|lock| lock.locked_at < locked_before)
            {
                claim.review_lock = None;
                cleared.push(id.clone());
            }
        }
        inner.mutations += cleared.len();
        Ok(cleared)
    }

    async fn payouts(&self, filter: PayoutFilter) -> Result<Vec<Payout>> {
        let inner = self.lock();
        let mut payouts: Vec<Payout> = inner
            .payouts
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        payouts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if filter.newest_first {
            payouts.reverse();
        }
        payouts.truncate(filter.limit);
        Ok(payouts)
    }

    async fn get_payout(&self, id: &PayoutId) -> Result<Option<Payout>> {
        let inner = self.lock();
        Self::check_payout(&inner, id)?;
        Ok(inner.payouts.get(id).cloned())
    }

    async fn update_payout(
        &self,
        id: &PayoutId,
        expected: &[PayoutStatus],
        patch: PayoutPatch,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.lock();
        Self::check_payout(&inner, id)?;
        let Some(payout) = inner.payouts.get_mut(id) else {
            return Ok(false);
        };
        if !expected.is_empty() && !expected.contains(&payout.status) {
            return Ok(false);
        }
        patch.apply(payout, now);
        inner.mutations += 1;
        Ok(true)
    }

    async fn get_owner(&self, id: &OwnerId) -> Result<Option<Owner>> {
        Ok(self.lock().owners.get(id).cloned())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.lock().audit.push(entry);
        Ok(())
    }

    async fn audit_entries(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let inner = self.lock();
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if filter.limit > 0 {
            entries.truncate(filter.limit);
        }
        Ok(entries)
    }

    async fn save_run_report(&self, report: &RunReport) -> Result<()> {
        self.lock().reports.push(report.clone());
        Ok(())
    }

    async fn recent_run_reports(&self, limit: usize) -> Result<Vec<RunReport>> {
        Ok(self.lock().reports.iter().rev().take(limit).cloned().collect())
    }
}
