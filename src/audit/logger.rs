use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use claimsync_common::{Actor, AuditDetail, AuditEntry, Clock, PayoutId};

use crate::reconcile::report::RunReport;
use crate::store::{AuditFilter, EntityStore};

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Build an entry stamped with the current time. Attach the subject with
    /// `for_claim` / `for_payout` before appending.
    pub fn entry(&self, actor: &Actor, reason: impl Into<String>, detail: AuditDetail) -> AuditEntry {
        AuditEntry::new(self.clock.now(), actor.clone(), reason, detail)
    }

    pub async fn append(&self, entry: AuditEntry) -> Result<()> {
        debug!(
            kind = entry.kind().as_str(),
            claim_id = entry.claim_id.as_ref().map(|id| id.as_str()),
            payout_id = entry.payout_id.as_ref().map(|id| id.as_str()),
            reason = %entry.reason,
            "audit"
        );
        self.store
            .append_audit(entry)
            .await
            .context("Failed to append audit entry")
    }

    pub async fn history_for_payout(&self, payout_id: &PayoutId) -> Result<Vec<AuditEntry>> {
        self.store
            .audit_entries(AuditFilter {
                payout_id: Some(payout_id.clone()),
                ..Default::default()
            })
            .await
            .context("Failed to read audit trail")
    }

    pub async fn finish_run(&self, report: &RunReport) -> Result<()> {
        self.store
            .save_run_report(report)
            .await
            .with_context(|| format!("Failed to persist run report {}", report.run_id))
    }

    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunReport>> {
        self.store
            .recent_run_reports(limit)
            .await
            .context("Failed to load run reports")
    }
}
