//! Periodic and watcher-driven sync triggers.

use crate::error::SyncResult;
use crate::jobs::{JobRunner, Submission};
use chrono::{DateTime, Utc};
use kbsync_config::Config;
use kbsync_core::Connector;
use kbsync_db::Database;
use kbsync_ingest::FolderWatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Submits every enabled connector whose cadence has elapsed, and cancels
/// runs of connectors that were disabled or removed since they started.
pub struct Scheduler {
    db: Database,
    runner: Arc<JobRunner>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(db: Database, runner: Arc<JobRunner>, tick: Duration) -> Self {
        Self { db, runner, tick }
    }

    pub fn from_config(config: &Config, db: Database, runner: Arc<JobRunner>) -> Self {
        Self::new(
            db,
            runner,
            Duration::from_secs(config.sync.scheduler_tick_seconds.max(1)),
        )
    }

    /// Submit due connectors once. Returns the new submissions.
    pub fn tick(&self, now: DateTime<Utc>) -> SyncResult<Vec<Submission>> {
        let connectors = self.db.list_connectors(false)?;
        self.cancel_withdrawn(&connectors);

        let mut submitted = Vec::new();
        for connector in connectors {
            if !connector.enabled || !connector.is_due(now) {
                continue;
            }
            let submission = self.runner.submit(&connector)?;
            if !submission.deduplicated {
                debug!(connector = %connector.name, "Connector due for sync");
                submitted.push(submission);
            }
        }
        Ok(submitted)
    }

    fn cancel_withdrawn(&self, connectors: &[Connector]) {
        for connector_id in self.runner.active_connectors() {
            let enabled = connectors
                .iter()
                .find(|c| c.id == connector_id)
                .map(|c| c.enabled);
            if enabled != Some(true) && self.runner.cancel(&connector_id) {
                info!(connector = %connector_id, "Connector disabled or removed, cancelled its sync");
            }
        }
    }

    /// Tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(tick_seconds = self.tick.as_secs(), "Scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick(Utc::now()) {
                        Ok(submitted) if !submitted.is_empty() => {
                            info!(jobs = submitted.len(), "Scheduled sync jobs");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "Scheduler tick failed"),
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}

/// Submit a sync whenever the watcher reports changes under a connector's folders.
pub async fn run_watch_triggers(
    watcher: FolderWatcher,
    db: Database,
    runner: Arc<JobRunner>,
    poll_every: Duration,
    cancel: CancellationToken,
) {
    info!(folders = watcher.watched_folders(), "Watching local folders");
    let mut interval = tokio::time::interval(poll_every);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                for connector_id in watcher.poll() {
                    let connector = match db.get_connector(&connector_id) {
                        Ok(connector) if connector.enabled => connector,
                        Ok(_) => continue,
                        Err(err) => {
                            warn!(connector = %connector_id, error = %err, "Changed folder has no connector");
                            continue;
                        }
                    };
                    match runner.submit(&connector) {
                        Ok(submission) => debug!(
                            connector = %connector.name,
                            job = %submission.job_id,
                            "Local change triggered sync"
                        ),
                        Err(err) => warn!(connector = %connector.name, error = %err, "Could not submit sync"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_orchestrator, ScriptedStore};
    use kbsync_core::{FileScope, JobStatus, ProviderKind, RunPhase};

    fn setup() -> (Database, Arc<ScriptedStore>, Arc<JobRunner>, Scheduler) {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(ScriptedStore::new());
        store.put("a.txt", "Scheduled content.");
        let runner = Arc::new(JobRunner::new(
            Arc::new(scripted_orchestrator(&db, store.clone())),
            2,
        ));
        let scheduler = Scheduler::new(db.clone(), runner.clone(), Duration::from_secs(30));
        (db, store, runner, scheduler)
    }

    #[tokio::test]
    async fn test_tick_submits_only_due_connectors() {
        let (db, _store, runner, scheduler) = setup();
        let now = Utc::now();

        let never_synced = Connector::new("new", ProviderKind::GoogleDrive, FileScope::default());
        let mut recent = Connector::new("recent", ProviderKind::GoogleDrive, FileScope::default());
        recent.last_sync = Some(now - chrono::Duration::minutes(1));
        let mut disabled = Connector::new("off", ProviderKind::GoogleDrive, FileScope::default());
        disabled.enabled = false;
        for c in [&never_synced, &recent, &disabled] {
            db.create_connector(c).unwrap();
        }

        let submitted = scheduler.tick(now).unwrap();

        assert_eq!(submitted.len(), 1);
        let job = runner.wait(&submitted[0].job_id).await.unwrap();
        assert_eq!(job.connector_id, never_synced.id);
        assert_eq!(job.status, JobStatus::Succeeded);

        // The finished run updated last_sync, so the connector is no longer due
        assert!(scheduler.tick(Utc::now()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_does_not_resubmit_in_flight_connector() {
        let (db, _store, _runner, scheduler) = setup();
        let connector = Connector::new("drive", ProviderKind::GoogleDrive, FileScope::default());
        db.create_connector(&connector).unwrap();

        let now = Utc::now();
        let first = scheduler.tick(now).unwrap();
        let second = scheduler.tick(now).unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (_db, _store, _runner, scheduler) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), scheduler.run(cancel))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabling_connector_cancels_its_run() {
        let (db, store, runner, scheduler) = setup();
        let connector = Connector::new("drive", ProviderKind::GoogleDrive, FileScope::default());
        db.create_connector(&connector).unwrap();
        let gate = store.hold_listing();

        let job_id = runner.submit(&connector).unwrap().job_id;
        let mut phase = runner.subscribe_phase(&job_id).unwrap();
        phase.wait_for(|p| *p == RunPhase::Listing).await.unwrap();

        db.set_connector_enabled(&connector.id, false).unwrap();
        assert!(scheduler.tick(Utc::now()).unwrap().is_empty());
        gate.add_permits(1);

        let job = runner.wait(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.run.unwrap().cancelled);
        assert!(db.list_file_states(&connector.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_leaves_enabled_runs_alone() {
        let (db, store, runner, scheduler) = setup();
        let connector = Connector::new("drive", ProviderKind::GoogleDrive, FileScope::default());
        db.create_connector(&connector).unwrap();
        let gate = store.hold_listing();

        let job_id = runner.submit(&connector).unwrap().job_id;
        let mut phase = runner.subscribe_phase(&job_id).unwrap();
        phase.wait_for(|p| *p == RunPhase::Listing).await.unwrap();

        scheduler.tick(Utc::now()).unwrap();
        gate.add_permits(1);

        let job = runner.wait(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(!job.run.unwrap().cancelled);
    }
}
