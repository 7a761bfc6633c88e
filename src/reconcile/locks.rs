use tracing::{info, warn};

use claimsync_common::{Actor, AuditDetail, ReconciliationRule};

use super::report::RunError;
use super::{Pass, Reconciler};
use crate::store::ClaimFilter;

impl Reconciler {
    /// Step 1: release review locks older than the lock TTL, whoever holds them.
    pub(crate) async fn sweep_expired_locks(&self, pass: &mut Pass) {
        if pass.out_of_time() {
            return;
        }
        let cutoff = self.clock.now() - self.config.lock_ttl;
        let expired = match self
            .store
            .claims(ClaimFilter::review_locked_before(
                cutoff,
                self.config.mismatch_batch,
            ))
            .await
        {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Expired lock query failed");
                pass.report
                    .record_error(RunError::new("expired_lock_sweep", format!("{:#}", e)));
                return;
            }
        };
        if expired.is_empty() {
            return;
        }

        let ids: Vec<_> = expired.iter().map(|c| c.id.clone()).collect();
        let cleared = match self.store.clear_review_locks(&ids, cutoff).await {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Clearing expired locks failed");
                pass.report
                    .record_error(RunError::new("expired_lock_sweep", format!("{:#}", e)));
                return;
            }
        };

        let rule = ReconciliationRule::ExpiredReviewLock;
        for claim in expired.iter().filter(|c| cleared.contains(&c.id)) {
            pass.report.expired_locks_cleared += 1;
            let entry = self
                .audit
                .entry(
                    &Actor::System,
                    rule.reason(),
                    AuditDetail::StateReconciliation {
                        rule,
                        previous_status: claim.status,
                        new_status: claim.status,
                    },
                )
                .for_claim(&claim.id);
            if let Err(e) = self.audit.append(entry).await {
                pass.report
                    .record_error(RunError::for_claim(&claim.id, "audit", format!("{:#}", e)));
            }
        }
        info!(cleared = cleared.len(), "Cleared expired review locks");
    }
}
