//! Sync command - run connector syncs in the foreground.

use super::{build_orchestrator, find_connector, get_config, get_database};
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use kbsync_core::{JobStatus, RunStatus, SyncRun};
use kbsync_sync::{JobRunner, JobSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

pub fn run(connector: Option<String>, all: bool) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let connectors = if all {
        db.list_connectors(true)?
    } else {
        let id = connector.context("Specify a connector or --all")?;
        vec![find_connector(&db, &id)?]
    };

    if connectors.is_empty() {
        println!("{}", "No enabled connectors to sync.".dimmed());
        return Ok(());
    }

    let orchestrator = Arc::new(build_orchestrator(&config, &db)?);
    let rt = Runtime::new().context("Failed to create async runtime")?;

    let jobs: Vec<JobSnapshot> = rt.block_on(async {
        let runner = JobRunner::with_lease_ttl(
            orchestrator,
            config.sync.max_concurrent_runs,
            Duration::from_secs(config.sync.lease_seconds),
        );

        let mut submitted = Vec::new();
        for connector in &connectors {
            let submission = runner.submit(connector)?;
            if submission.held_elsewhere {
                println!(
                    "{} {} is already syncing in another kbsync process",
                    "-".dimmed(),
                    connector.name.white().bold()
                );
                continue;
            }
            submitted.push((connector.name.clone(), submission.job_id));
        }

        let mut finished = Vec::new();
        for (name, job_id) in submitted {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(Duration::from_millis(100));

            let mut phase = runner.subscribe_phase(&job_id)?;
            let job = loop {
                pb.set_message(format!("{}: {}", name, *phase.borrow()));
                tokio::select! {
                    job = runner.wait(&job_id) => break job?,
                    changed = phase.changed() => {
                        if changed.is_err() {
                            break runner.wait(&job_id).await?;
                        }
                    }
                }
            };
            pb.finish_and_clear();
            finished.push(job);
        }

        runner.shutdown().await;
        Ok::<_, anyhow::Error>(finished)
    })?;

    let mut failed = 0;
    for job in &jobs {
        print_job(job);
        if job.status == JobStatus::Failed {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} syncs failed", failed, jobs.len());
    }
    Ok(())
}

fn print_job(job: &JobSnapshot) {
    match job.run {
        Some(ref run) => print_run(&job.connector_name, run),
        None => println!(
            "{} {}: {}",
            "✗".red(),
            job.connector_name.white().bold(),
            job.error.as_deref().unwrap_or("failed")
        ),
    }
}

/// Print one run with its counters and errors.
pub fn print_run(name: &str, run: &SyncRun) {
    let marker = match run.status {
        RunStatus::Success => "✓".green(),
        RunStatus::PartialSuccess => "!".yellow(),
        RunStatus::Failed => "✗".red(),
    };
    let cancelled = if run.cancelled { " (cancelled)" } else { "" };
    let duration = (run.completed_at - run.started_at).num_milliseconds() as f64 / 1000.0;

    println!(
        "{} {} {}{} in {:.1}s: {} processed, {} deleted, {} unchanged",
        marker,
        name.white().bold(),
        run.status,
        cancelled,
        duration,
        run.files_processed.to_string().green(),
        run.files_deleted,
        run.files_unchanged
    );
    for error in &run.errors {
        println!(
            "    {} {} [{}] {}",
            "✗".red(),
            error.file_id.as_deref().unwrap_or("(connector)"),
            error.kind.as_str().yellow(),
            error.message.dimmed()
        );
    }
}
