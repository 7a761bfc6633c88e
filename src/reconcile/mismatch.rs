use anyhow::Result;
use tracing::{debug, info, warn};

use claimsync_common::{
    Actor, AuditDetail, Claim, ClaimStatus, Payout, PayoutId, PayoutStatus, ReconciliationRule,
};

use super::report::RunError;
use super::{Pass, Reconciler};
use crate::store::{ClaimFilter, ClaimPatch, PayoutFilter};

/// Which counter a settling-rule correction lands in.
#[derive(Clone, Copy)]
enum SettlingRule {
    Stale,
    Orphaned,
}

impl Reconciler {
    /// Step 2: settle claims whose payout already completed, then apply the
    /// stale and orphaned settling rules.
    pub(crate) async fn correct_mismatches(&self, pass: &mut Pass) {
        self.settle_claims_with_completed_payouts(pass).await;
        self.fix_settling(pass, SettlingRule::Stale).await;
        self.fix_settling(pass, SettlingRule::Orphaned).await;
    }

    async fn settle_claims_with_completed_payouts(&self, pass: &mut Pass) {
        if pass.out_of_time() {
            return;
        }
        let claims = match self
            .store
            .claims(ClaimFilter::with_statuses(
                &ClaimStatus::AWAITING_PAYOUT,
                self.config.mismatch_batch,
            ))
            .await
        {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Mismatch query failed");
                pass.report
                    .record_error(RunError::new("mismatch_correction", format!("{:#}", e)));
                return;
            }
        };

        for claim in claims {
            if pass.out_of_time() {
                return;
            }
            match self.settle_if_payout_completed(&claim).await {
                Ok(true) => pass.report.mismatched_states_fixed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(claim_id = %claim.id, error = %format!("{:#}", e), "Mismatch correction failed");
                    pass.report.record_error(RunError::for_claim(
                        &claim.id,
                        "mismatch_correction",
                        format!("{:#}", e),
                    ));
                }
            }
        }
    }

    async fn settle_if_payout_completed(&self, claim: &Claim) -> Result<bool> {
        let completed = self
            .store
            .payouts(PayoutFilter::for_claim(&claim.id).status(PayoutStatus::Completed))
            .await?;
        let Some(payout) = completed.first() else {
            return Ok(false);
        };
        self.transition_claim(
            claim,
            ClaimStatus::Settled,
            ReconciliationRule::CompletedPayoutFound,
            Some(&payout.id),
        )
        .await
    }

    async fn fix_settling(&self, pass: &mut Pass, rule: SettlingRule) {
        if pass.out_of_time() {
            return;
        }
        let (age, operation) = match rule {
            SettlingRule::Stale => (self.config.stale_settling_after, "stale_settling"),
            SettlingRule::Orphaned => (self.config.orphaned_settling_after, "orphaned_settling"),
        };
        let cutoff = self.clock.now() - age;
        let claims = match self
            .store
            .claims(
                ClaimFilter::with_statuses(&[ClaimStatus::Settling], self.config.mismatch_batch)
                    .updated_before(cutoff),
            )
            .await
        {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %format!("{:#}", e), operation, "Settling query failed");
                pass.report
                    .record_error(RunError::new(operation, format!("{:#}", e)));
                return;
            }
        };

        for claim in claims {
            if pass.out_of_time() {
                return;
            }
            let result = match rule {
                SettlingRule::Stale => self.fix_stale_settling(&claim).await,
                SettlingRule::Orphaned => self.fix_orphaned_settling(&claim).await,
            };
            match result {
                Ok(true) => match rule {
                    SettlingRule::Stale => pass.report.stale_settling_fixed += 1,
                    SettlingRule::Orphaned => pass.report.orphaned_settling_fixed += 1,
                },
                Ok(false) => {}
                Err(e) => {
                    warn!(claim_id = %claim.id, error = %format!("{:#}", e), operation, "Settling correction failed");
                    pass.report.record_error(RunError::for_claim(
                        &claim.id,
                        operation,
                        format!("{:#}", e),
                    ));
                }
            }
        }
    }

    /// Decided by the most recent payout: completed settles, failed reverts,
    /// anything else waits.
    async fn fix_stale_settling(&self, claim: &Claim) -> Result<bool> {
        let latest = self.latest_payout(claim).await?;
        match latest.as_ref().map(|p| p.status) {
            Some(PayoutStatus::Completed) => {
                self.transition_claim(
                    claim,
                    ClaimStatus::Settled,
                    ReconciliationRule::StaleSettlingCompleted,
                    latest.as_ref().map(|p| &p.id),
                )
                .await
            }
            Some(PayoutStatus::Failed) => {
                self.transition_claim(
                    claim,
                    ClaimStatus::Processing,
                    ReconciliationRule::StaleSettlingFailed,
                    latest.as_ref().map(|p| &p.id),
                )
                .await
            }
            _ => Ok(false),
        }
    }

    /// Any completed payout settles the claim; otherwise it goes back to
    /// processing.
    async fn fix_orphaned_settling(&self, claim: &Claim) -> Result<bool> {
        let completed = self
            .store
            .payouts(PayoutFilter::for_claim(&claim.id).status(PayoutStatus::Completed))
            .await?;
        match completed.first() {
            Some(payout) => {
                self.transition_claim(
                    claim,
                    ClaimStatus::Settled,
                    ReconciliationRule::CompletedPayoutFound,
                    Some(&payout.id),
                )
                .await
            }
            None => {
                let latest = self.latest_payout(claim).await?;
                self.transition_claim(
                    claim,
                    ClaimStatus::Processing,
                    ReconciliationRule::OrphanedSettling,
                    latest.as_ref().map(|p| &p.id),
                )
                .await
            }
        }
    }

    async fn latest_payout(&self, claim: &Claim) -> Result<Option<Payout>> {
        Ok(self
            .store
            .payouts(PayoutFilter::for_claim(&claim.id).newest_first())
            .await?
            .into_iter()
            .next())
    }

    /// Conditional status transition guarded on the status we observed,
    /// followed by its audit entry. `Ok(false)` means the claim moved on.
    pub(crate) async fn transition_claim(
        &self,
        claim: &Claim,
        to: ClaimStatus,
        rule: ReconciliationRule,
        payout_id: Option<&PayoutId>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let patch = ClaimPatch {
            status: Some(to),
            settled_at: (to == ClaimStatus::Settled).then_some(now),
            reconciled_at: Some(now),
            reconciled_reason: Some(rule.reason().to_string()),
            clear_review_lock: false,
        };
        let applied = self
            .store
            .update_claim(&claim.id, &[claim.status], patch)
            .await?;
        if !applied {
            debug!(claim_id = %claim.id, "Claim changed concurrently, skipping correction");
            return Ok(false);
        }

        let mut entry = self
            .audit
            .entry(
                &Actor::System,
                rule.reason(),
                AuditDetail::StateReconciliation {
                    rule,
                    previous_status: claim.status,
                    new_status: to,
                },
            )
            .for_claim(&claim.id);
        if let Some(payout_id) = payout_id {
            entry = entry.for_payout(payout_id);
        }
        self.audit.append(entry).await?;

        info!(
            claim_id = %claim.id,
            from = %claim.status,
            to = %to,
            rule = rule.reason(),
            "Reconciled claim status"
        );
        Ok(true)
    }
}
