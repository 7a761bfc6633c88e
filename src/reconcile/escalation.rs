use anyhow::Result;
use tracing::{error, warn};

use claimsync_common::{Actor, AuditDetail, Payout, PayoutStatus};

use super::report::RunError;
use super::{Pass, Reconciler};
use crate::notify::{Channel, Notification};
use crate::store::PayoutPatch;

impl Reconciler {
    /// Step 4: move a payout that is out of automatic attempts to
    /// `escalated` and alert the admins.
    pub(crate) async fn escalate(&self, pass: &mut Pass, payout: &Payout) {
        match self.mark_escalated(payout).await {
            Ok(true) => {
                pass.report.escalated_to_admin += 1;
                self.alert_admins(payout).await;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(payout_id = %payout.id, error = %format!("{:#}", e), "Escalation failed");
                pass.report.record_error(RunError::for_payout(
                    &payout.id,
                    "escalation",
                    format!("{:#}", e),
                ));
            }
        }
    }

    async fn mark_escalated(&self, payout: &Payout) -> Result<bool> {
        let reason = format!("failed after {} retry attempts", payout.retry_count);
        let applied = self
            .store
            .update_payout(
                &payout.id,
                &[payout.status],
                PayoutPatch {
                    status: Some(PayoutStatus::Escalated),
                    escalated_at: Some(self.clock.now()),
                    escalated_reason: Some(reason),
                    ..Default::default()
                },
            )
            .await?;
        if !applied {
            return Ok(false);
        }

        let entry = self
            .audit
            .entry(
                &Actor::System,
                "max_retries_exceeded",
                AuditDetail::Escalation {
                    retry_count: payout.retry_count,
                    failure_type: payout.failure_type,
                    last_error: payout.last_error.clone(),
                    requires_manual_intervention: true,
                },
            )
            .for_payout(&payout.id)
            .for_claim(&payout.claim_id);
        self.audit.append(entry).await?;

        error!(
            payout_id = %payout.id,
            claim_id = %payout.claim_id,
            retry_count = payout.retry_count,
            "Payout escalated to admin"
        );
        Ok(true)
    }

    /// Best-effort: delivery failures are logged and never fail the pass.
    async fn alert_admins(&self, payout: &Payout) {
        let notification = Notification::PayoutEscalation {
            payout_id: payout.id.clone(),
            claim_id: payout.claim_id.clone(),
            amount_cents: payout.amount_cents,
            currency: payout.currency.clone(),
            retry_count: payout.retry_count,
            failure_type: payout.failure_type,
            last_error: payout.last_error.clone(),
        };
        if !self.notifier.send(&Channel::Chat, &notification).await {
            warn!(payout_id = %payout.id, "Escalation chat alert not delivered");
        }
        if let Some(ref admin) = self.config.admin_email {
            let channel = Channel::Email { to: admin.clone() };
            if !self.notifier.send(&channel, &notification).await {
                warn!(payout_id = %payout.id, "Escalation email not delivered");
            }
        }
    }
}
