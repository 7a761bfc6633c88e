//! One-shot reconciliation commands: `claimsync run`, `retry`, `runs`.

use anyhow::{Context, Result};

use claimsync::app::Runtime;
use claimsync::config::ClaimsyncConfig;
use claimsync::operator::OperatorAuthorizer;
use claimsync::reconcile::RunTrigger;
use claimsync_common::{ManualRetryOutcome, PayoutId};

pub async fn cmd_run(config: &ClaimsyncConfig) -> Result<()> {
    let runtime = Runtime::from_config(config)?;
    let report = runtime
        .reconciler
        .run_pass(RunTrigger::Manual {
            operator: "cli".to_string(),
        })
        .await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
    );
    Ok(())
}

pub async fn cmd_retry(config: &ClaimsyncConfig, payout_id: &str, token: &str) -> Result<()> {
    let runtime = Runtime::from_config(config)?;
    let operator = runtime.authorizer.authorize(Some(token))?;
    let result = runtime
        .reconciler
        .manual_retry(&PayoutId::new(payout_id), &operator)
        .await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize retry result")?
    );
    if result.outcome == ManualRetryOutcome::Failed {
        anyhow::bail!("{}", result.message);
    }
    Ok(())
}

pub async fn cmd_runs(config: &ClaimsyncConfig, limit: usize) -> Result<()> {
    let runtime = Runtime::from_config(config)?;
    let runs = runtime.reconciler.audit().list_runs(limit).await?;
    if runs.is_empty() {
        println!("No reconciliation runs recorded.");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {:<18} {:>6} ms  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            &run.run_id.to_string()[..8],
            run.trigger.to_string(),
            run.duration_ms,
            run.summary_line()
        );
    }
    Ok(())
}
