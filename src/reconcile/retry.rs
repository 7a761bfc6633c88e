use tracing::{info, warn};

use claimsync_common::{Actor, AuditDetail, ClaimStatus, FailureType, Payout, PayoutStatus};

use super::report::RunError;
use super::{Pass, Reconciler};
use crate::errors::ReconcileError;
use crate::gateway::{PayoutOutcome, PayoutRequest};
use crate::notify::{Channel, Notification};
use crate::store::{ClaimPatch, PayoutFilter, PayoutPatch};

/// What a single retry did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// `settle_error` is set when the payout completed but the follow-up
    /// claim write failed.
    Succeeded {
        transaction_id: Option<String>,
        settle_error: Option<String>,
    },
    /// The payout was requeued with an incremented retry count.
    Failed { error: String },
    /// The claim no longer awaits a payout, so nothing was sent or written.
    Aborted { claim_status: ClaimStatus },
    /// The payout was already completed; nothing was sent.
    AlreadyCompleted,
    /// The payout changed between our read and our write.
    Superseded,
}

impl Reconciler {
    /// Step 3: retry failed payouts under the automatic threshold and
    /// escalate the rest.
    pub(crate) async fn retry_failed_payouts(&self, pass: &mut Pass) {
        if pass.out_of_time() {
            return;
        }
        let payouts = match self
            .store
            .payouts(PayoutFilter::with_statuses(
                &PayoutStatus::RETRYABLE,
                self.config.retry_batch,
            ))
            .await
        {
            Ok(payouts) => payouts,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Retry query failed");
                pass.report
                    .record_error(RunError::new("retry_failed_operations", format!("{:#}", e)));
                return;
            }
        };

        for payout in payouts {
            if pass.out_of_time() {
                return;
            }
            if payout.retry_count >= self.config.max_retries {
                self.escalate(pass, &payout).await;
                continue;
            }
            match self.retry_payout(&payout, &Actor::System).await {
                Ok(outcome) => {
                    pass.report.failed_operations_retried += 1;
                    if let RetryOutcome::Succeeded { settle_error, .. } = outcome {
                        pass.report.successful_retries += 1;
                        if let Some(error) = settle_error {
                            pass.report.record_error(RunError::for_payout(
                                &payout.id,
                                "settle_claim",
                                error,
                            ));
                        }
                    }
                }
                Err(e) => {
                    warn!(payout_id = %payout.id, error = %e, "Payout retry failed");
                    pass.report.record_error(RunError::for_payout(
                        &payout.id,
                        "retry",
                        e.to_string(),
                    ));
                }
            }
        }
    }

    /// One retry of the operation that failed for this payout. Shared by the
    /// automatic sweep and the operator entrypoint.
    pub(crate) async fn retry_payout(
        &self,
        payout: &Payout,
        actor: &Actor,
    ) -> Result<RetryOutcome, ReconcileError> {
        match payout.failure_type {
            FailureType::PaymentExecution => self.retry_payment(payout, actor).await,
            FailureType::NotificationDelivery => self.retry_notification(payout, actor).await,
        }
    }

    async fn retry_payment(
        &self,
        payout: &Payout,
        actor: &Actor,
    ) -> Result<RetryOutcome, ReconcileError> {
        let claim = self
            .store
            .get_claim(&payout.claim_id)
            .await
            .map_err(ReconcileError::Store)?
            .ok_or_else(|| ReconcileError::ClaimNotFound {
                id: payout.claim_id.clone(),
            })?;
        if !claim.status.is_awaiting_payout() {
            info!(
                payout_id = %payout.id,
                claim_id = %claim.id,
                claim_status = %claim.status,
                "Claim no longer awaits payout, aborting retry"
            );
            return Ok(RetryOutcome::Aborted {
                claim_status: claim.status,
            });
        }

        let request = PayoutRequest::for_payout(payout);
        match self.payments.execute_payout(&request).await {
            PayoutOutcome::Succeeded { transaction_id } => {
                let now = self.clock.now();
                let applied = self
                    .store
                    .update_payout(
                        &payout.id,
                        &[payout.status],
                        PayoutPatch {
                            status: Some(PayoutStatus::Completed),
                            transaction_id: Some(transaction_id.clone()),
                            completed_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(ReconcileError::Store)?;
                if !applied {
                    warn!(payout_id = %payout.id, "Payout changed during retry, not marking completed");
                    return Ok(RetryOutcome::Superseded);
                }
                // Best-effort second write; the next pass settles the claim
                // through the completed payout if this one loses a race or fails.
                let settle_error = match self
                    .store
                    .update_claim(
                        &claim.id,
                        &ClaimStatus::AWAITING_PAYOUT,
                        ClaimPatch {
                            status: Some(ClaimStatus::Settled),
                            settled_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    Ok(_) => None,
                    Err(e) => {
                        let error = format!("{:#}", e);
                        warn!(
                            payout_id = %payout.id,
                            claim_id = %claim.id,
                            error = %error,
                            "Payout completed but settling the claim failed"
                        );
                        Some(error)
                    }
                };

                self.record_success(payout, actor, Some(transaction_id), settle_error)
                    .await
            }
            PayoutOutcome::Failed { error } => self.record_failed_attempt(payout, actor, error).await,
        }
    }

    async fn retry_notification(
        &self,
        payout: &Payout,
        actor: &Actor,
    ) -> Result<RetryOutcome, ReconcileError> {
        let claim = self
            .store
            .get_claim(&payout.claim_id)
            .await
            .map_err(ReconcileError::Store)?
            .ok_or_else(|| ReconcileError::ClaimNotFound {
                id: payout.claim_id.clone(),
            })?;
        let owner = self
            .store
            .get_owner(&claim.owner_id)
            .await
            .map_err(ReconcileError::Store)?
            .ok_or_else(|| ReconcileError::OwnerNotFound {
                id: claim.owner_id.clone(),
            })?;

        let notification = Notification::PayoutProcessed {
            claim_id: claim.id.clone(),
            owner_name: owner.display_name(),
            amount_cents: payout.amount_cents,
            currency: payout.currency.clone(),
        };
        let channel = Channel::Email {
            to: owner.email.clone(),
        };
        if !self.notifier.send(&channel, &notification).await {
            return self
                .record_failed_attempt(payout, actor, "notification delivery failed".to_string())
                .await;
        }

        let now = self.clock.now();
        let applied = self
            .store
            .update_payout(
                &payout.id,
                &[payout.status],
                PayoutPatch {
                    status: Some(PayoutStatus::Completed),
                    completed_at: Some(now),
                    notification_sent_at: Some(now),
                    ..Default::default()
                },
            )
            .await
            .map_err(ReconcileError::Store)?;
        if !applied {
            return Ok(RetryOutcome::Superseded);
        }
        self.record_success(payout, actor, None, None).await
    }

    async fn record_success(
        &self,
        payout: &Payout,
        actor: &Actor,
        transaction_id: Option<String>,
        settle_error: Option<String>,
    ) -> Result<RetryOutcome, ReconcileError> {
        let entry = self
            .audit
            .entry(
                actor,
                "retry succeeded",
                AuditDetail::RetrySuccess {
                    retry_count: payout.retry_count.saturating_add(1),
                    failure_type: payout.failure_type,
                    transaction_id: transaction_id.clone(),
                },
            )
            .for_payout(&payout.id)
            .for_claim(&payout.claim_id);
        self.audit.append(entry).await.map_err(ReconcileError::Store)?;
        info!(
            payout_id = %payout.id,
            failure_type = %payout.failure_type,
            "Payout retry succeeded"
        );
        Ok(RetryOutcome::Succeeded {
            transaction_id,
            settle_error,
        })
    }

    async fn record_failed_attempt(
        &self,
        payout: &Payout,
        actor: &Actor,
        error: String,
    ) -> Result<RetryOutcome, ReconcileError> {
        let retry_count = payout.retry_count.saturating_add(1);
        let applied = self
            .store
            .update_payout(
                &payout.id,
                &[payout.status],
                PayoutPatch {
                    status: Some(PayoutStatus::PendingRetry),
                    retry_count: Some(retry_count),
                    last_retry_at: Some(self.clock.now()),
                    last_error: Some(error.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(ReconcileError::Store)?;
        if !applied {
            return Ok(RetryOutcome::Superseded);
        }

        let entry = self
            .audit
            .entry(
                actor,
                "retry failed",
                AuditDetail::RetryAttempt {
                    retry_count,
                    failure_type: payout.failure_type,
                    result: "failed".to_string(),
                    error: Some(error.clone()),
                },
            )
            .for_payout(&payout.id)
            .for_claim(&payout.claim_id);
        self.audit.append(entry).await.map_err(ReconcileError::Store)?;
        warn!(
            payout_id = %payout.id,
            retry_count,
            error = %error,
            "Payout retry failed, requeued"
        );
        Ok(RetryOutcome::Failed { error })
    }
}
