//! Long-running service: `claimsync serve`.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use claimsync::app::Runtime;
use claimsync::config::ClaimsyncConfig;
use claimsync::scheduler::Scheduler;
use claimsync::server;

pub async fn cmd_serve(mut config: ClaimsyncConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let runtime = Runtime::from_config(&config)?;
    let shutdown = CancellationToken::new();

    let scheduler = Scheduler::new(
        runtime.reconciler.clone(),
        Duration::from_secs(config.schedule.interval_minutes.max(1) * 60),
        config.schedule.run_on_start,
    );
    let scheduler_token = shutdown.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run_until(scheduler_token.cancelled_owned())
            .await
    });

    let state = server::app_state(runtime.reconciler.clone(), runtime.authorizer.clone());
    let app = server::build_router(state, config.server.cors_permissive);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let server_token = shutdown.clone();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        server_token.cancel();
    });

    let served = server::start_server(&addr, app, shutdown.clone().cancelled_owned()).await;
    // Stop the scheduler even if the server failed to bind.
    shutdown.cancel();
    let passes = scheduler_task
        .await
        .context("Scheduler task panicked")?;
    info!(passes, "claimsync stopped");
    served
}
