//! The claims/payout state reconciler.
//!
//! A pass runs four sub-procedures in a fixed order:
//!
//! 1. expired review-lock sweep (`locks`)
//! 2. mismatch detection and correction, including the stale and orphaned
//!    settling rules (`mismatch`)
//! 3. bounded retry of failed payouts (`retry`), escalating payouts that are
//!    out of automatic attempts (`escalation`)
//! 4. run summary: the report is persisted and, when the pass did something
//!    noteworthy, summarized to the operators' chat channel
//!
//! Per-document failures land in the report's `errors` and never abort the
//! pass. Only failing to persist the report propagates out of `run_pass`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use claimsync_common::{AuditDetail, Clock, ManualRetryOutcome, PayoutId, PayoutStatus};

use crate::audit::AuditLogger;
use crate::errors::ReconcileError;
use crate::gateway::PaymentGateway;
use crate::notify::{Channel, Notification, Notifier};
use crate::operator::Operator;
use crate::store::EntityStore;

mod escalation;
mod locks;
mod mismatch;
pub mod report;
mod retry;

pub use report::{RunError, RunReport, RunTrigger};
pub use retry::RetryOutcome;

/// Thresholds and limits for a pass.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub lock_ttl: chrono::Duration,
    pub stale_settling_after: chrono::Duration,
    pub orphaned_settling_after: chrono::Duration,
    /// Automatic attempts before a payout is escalated.
    pub max_retries: u32,
    pub mismatch_batch: usize,
    pub retry_batch: usize,
    pub pass_deadline: Duration,
    pub summary_mismatch_threshold: u32,
    /// Escalation emails go here; `None` skips the email leg.
    pub admin_email: Option<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: chrono::Duration::minutes(10),
            stale_settling_after: chrono::Duration::minutes(15),
            orphaned_settling_after: chrono::Duration::minutes(30),
            max_retries: 3,
            mismatch_batch: 500,
            retry_batch: 100,
            pass_deadline: Duration::from_secs(540),
            summary_mismatch_threshold: 10,
            admin_email: None,
        }
    }
}

/// Result of an operator-triggered retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualRetryResult {
    pub success: bool,
    pub payout_id: PayoutId,
    pub outcome: ManualRetryOutcome,
    pub message: String,
}

/// Mutable state threaded through one pass.
pub(crate) struct Pass {
    pub report: RunReport,
    started: Instant,
    deadline: Duration,
}

impl Pass {
    fn new(report: RunReport, deadline: Duration) -> Self {
        Self {
            report,
            started: Instant::now(),
            deadline,
        }
    }

    /// True once the pass is out of time. The first call past the deadline
    /// records a single `deadline_exceeded` error.
    pub fn out_of_time(&mut self) -> bool {
        if self.report.deadline_exceeded {
            return true;
        }
        if self.started.elapsed() < self.deadline {
            return false;
        }
        warn!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Reconciliation pass deadline exceeded, stopping early"
        );
        self.report.deadline_exceeded = true;
        self.report.record_error(RunError::new(
            "deadline_exceeded",
            format!("pass exceeded its {}s deadline", self.deadline.as_secs()),
        ));
        true
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

pub struct Reconciler {
    store: Arc<dyn EntityStore>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    audit: AuditLogger,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn EntityStore>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let audit = AuditLogger::new(store.clone(), clock.clone());
        Self {
            store,
            payments,
            notifier,
            clock,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Run one full reconciliation pass.
    pub async fn run_pass(&self, trigger: RunTrigger) -> Result<RunReport, ReconcileError> {
        info!(trigger = %trigger, "Starting reconciliation pass");
        let mut pass = Pass::new(
            RunReport::started(trigger, self.clock.now()),
            self.config.pass_deadline,
        );

        self.sweep_expired_locks(&mut pass).await;
        self.correct_mismatches(&mut pass).await;
        self.retry_failed_payouts(&mut pass).await;

        let duration_ms = pass.elapsed_ms();
        let mut report = pass.report;
        report.finish(self.clock.now(), duration_ms);

        self.audit
            .finish_run(&report)
            .await
            .map_err(ReconcileError::ReportPersistence)?;

        info!(
            run_id = %report.run_id,
            duration_ms = report.duration_ms,
            deadline_exceeded = report.deadline_exceeded,
            "Reconciliation pass complete: {}",
            report.summary_line()
        );

        if report.is_significant(self.config.summary_mismatch_threshold) {
            let summary = Notification::RunSummary(Box::new(report.clone()));
            if !self.notifier.send(&Channel::Chat, &summary).await {
                warn!(run_id = %report.run_id, "Run summary notification was not delivered");
            }
        }

        Ok(report)
    }

    /// Retry one payout on an operator's behalf.
    ///
    /// Ignores the automatic retry threshold and also accepts escalated
    /// payouts. Completed payouts are skipped. A `manual_retry` audit entry
    /// is written whatever the outcome.
    pub async fn manual_retry(
        &self,
        payout_id: &PayoutId,
        operator: &Operator,
    ) -> Result<ManualRetryResult, ReconcileError> {
        let payout = self
            .store
            .get_payout(payout_id)
            .await
            .map_err(ReconcileError::Store)?
            .ok_or_else(|| ReconcileError::PayoutNotFound {
                id: payout_id.clone(),
            })?;

        let actor = operator.actor();
        info!(payout_id = %payout_id, operator = %operator.id, "Manual payout retry");

        let attempt = if payout.status == PayoutStatus::Completed {
            Ok(RetryOutcome::AlreadyCompleted)
        } else {
            self.retry_payout(&payout, &actor).await
        };

        let (outcome, message) = match &attempt {
            Ok(RetryOutcome::Succeeded {
                settle_error: Some(error),
                ..
            }) => (
                ManualRetryOutcome::Success,
                format!("Payout retry succeeded; claim not settled yet: {}", error),
            ),
            Ok(RetryOutcome::Succeeded { .. }) => (
                ManualRetryOutcome::Success,
                "Payout retry succeeded".to_string(),
            ),
            Ok(RetryOutcome::Failed { error }) => (
                ManualRetryOutcome::Failed,
                format!("Payout retry failed: {}", error),
            ),
            Ok(RetryOutcome::Aborted { claim_status }) => (
                ManualRetryOutcome::Failed,
                format!("Claim is {}; payout retry aborted", claim_status),
            ),
            Ok(RetryOutcome::AlreadyCompleted) => (
                ManualRetryOutcome::Skipped,
                "Payout already completed".to_string(),
            ),
            Ok(RetryOutcome::Superseded) => (
                ManualRetryOutcome::Skipped,
                "Payout changed concurrently; nothing written".to_string(),
            ),
            Err(e) => (ManualRetryOutcome::Failed, format!("Payout retry failed: {}", e)),
        };

        let entry = self
            .audit
            .entry(&actor, message.clone(), AuditDetail::ManualRetry { outcome })
            .for_payout(&payout.id)
            .for_claim(&payout.claim_id);
        self.audit.append(entry).await.map_err(ReconcileError::Store)?;

        attempt?;
        Ok(ManualRetryResult {
            success: outcome == ManualRetryOutcome::Success,
            payout_id: payout.id,
            outcome,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.lock_ttl, chrono::Duration::minutes(10));
        assert_eq!(config.stale_settling_after, chrono::Duration::minutes(15));
        assert_eq!(config.orphaned_settling_after, chrono::Duration::minutes(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.mismatch_batch, 500);
        assert_eq!(config.retry_batch, 100);
        assert_eq!(config.pass_deadline, Duration::from_secs(540));
    }

    #[test]
    fn deadline_error_is_recorded_once() {
        let report = RunReport::started(RunTrigger::Scheduled, chrono::Utc::now());
        let mut pass = Pass::new(report, Duration::ZERO);
        assert!(pass.out_of_time());
        assert!(pass.out_of_time());
        assert!(pass.report.deadline_exceeded);
        assert_eq!(pass.report.errors.len(), 1);
        assert_eq!(pass.report.errors[0].operation, "deadline_exceeded");
    }

    #[test]
    fn generous_deadline_is_not_exceeded() {
        let report = RunReport::started(RunTrigger::Scheduled, chrono::Utc::now());
        let mut pass = Pass::new(report, Duration::from_secs(3600));
        assert!(!pass.out_of_time());
        assert!(pass.report.errors.is_empty());
    }
}
