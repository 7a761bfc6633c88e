//! Fixed-interval driver for scheduled passes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::reconcile::{Reconciler, RunTrigger};

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    period: Duration,
    run_on_start: bool,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, period: Duration, run_on_start: bool) -> Self {
        Self {
            reconciler,
            period,
            run_on_start,
        }
    }

    /// Run passes until `shutdown` resolves. A pass in flight is finished
    /// before returning. Ticks missed while a pass overran are skipped, not
    /// replayed.
    pub async fn run_until<F>(self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let first = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + self.period
        };
        let mut ticker = tokio::time::interval_at(first, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            period_secs = self.period.as_secs(),
            run_on_start = self.run_on_start,
            "Reconciliation scheduler started"
        );
        let mut passes = 0usize;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    passes += 1;
                    if let Err(e) = self.reconciler.run_pass(RunTrigger::Scheduled).await {
                        error!(error = %e, "Scheduled reconciliation pass failed");
                    }
                }
            }
        }
        info!(passes, "Reconciliation scheduler stopped");
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::reconciler_with_store;

    #[tokio::test]
    async fn runs_on_start_and_on_each_tick_until_shutdown() {
        let (store, reconciler) = reconciler_with_store();
        let scheduler = Scheduler::new(reconciler, Duration::from_millis(50), true);
        let passes = scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(130)))
            .await;
        assert!(passes >= 2, "expected at least two passes, got {}", passes);
        assert_eq!(store.reports().len(), passes);
    }

    #[tokio::test]
    async fn without_run_on_start_waits_a_full_period() {
        let (store, reconciler) = reconciler_with_store();
        let scheduler = Scheduler::new(reconciler, Duration::from_secs(3600), false);
        let passes = scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(30)))
            .await;
        assert_eq!(passes, 0);
        assert!(store.reports().is_empty());
    }
}
