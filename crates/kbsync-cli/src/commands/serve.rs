//! Serve command - keep every connector in sync until interrupted.

use super::{build_orchestrator, get_config, get_database};
use anyhow::{Context, Result};
use colored::Colorize;
use kbsync_core::ProviderKind;
use kbsync_ingest::{FolderWatcher, WatcherConfig};
use kbsync_sync::{run_watch_triggers, JobRunner, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn run() -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let orchestrator = Arc::new(build_orchestrator(&config, &db)?);

    let connectors = db.list_connectors(true)?;
    println!("{}", "Starting kbsync...".cyan());
    println!("Syncing {} enabled connector(s):", connectors.len());
    for connector in &connectors {
        println!(
            "  {} {} [{}] every {}m",
            "+".green(),
            connector.name,
            connector.provider,
            connector.sync_interval_minutes
        );
    }
    println!("\nPress Ctrl+C to stop.\n");

    let rt = Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(async {
        let shutdown = CancellationToken::new();
        let runner = Arc::new(JobRunner::with_lease_ttl(
            orchestrator,
            config.sync.max_concurrent_runs,
            Duration::from_secs(config.sync.lease_seconds),
        ));

        let scheduler = Scheduler::from_config(&config, db.clone(), runner.clone());
        let scheduler_task = tokio::spawn({
            let cancel = shutdown.clone();
            async move { scheduler.run(cancel).await }
        });

        let mut watcher = FolderWatcher::new(WatcherConfig::from_config(&config.watch))
            .context("Failed to start folder watcher")?;
        for connector in connectors.iter().filter(|c| c.provider == ProviderKind::LocalFolder) {
            if let Err(e) = watcher.watch_connector(connector) {
                warn!(connector = %connector.name, error = %e, "Not watching connector folders");
            }
        }
        let watch_task = tokio::spawn(run_watch_triggers(
            watcher,
            db.clone(),
            runner.clone(),
            Duration::from_millis(500),
            shutdown.clone(),
        ));

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        println!("\n{}", "Stopping, waiting for running syncs to wind down...".yellow());
        info!("Shutdown requested");

        shutdown.cancel();
        runner.shutdown().await;
        if let Err(e) = scheduler_task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        if let Err(e) = watch_task.await {
            warn!(error = %e, "Watcher task ended abnormally");
        }

        Ok::<_, anyhow::Error>(())
    })?;

    println!("{}", "Stopped.".green());
    Ok(())
}
