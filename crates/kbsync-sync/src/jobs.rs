//! Job runner: background sync runs with one active job per connector.

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{run_succeeded, Orchestrator};
use chrono::{DateTime, Utc};
use kbsync_core::{new_id, Connector, ConnectorId, JobStatus, RunPhase, SyncRun};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub type JobId = String;

/// Finished jobs kept for status queries.
const FINISHED_JOBS_RETAINED: usize = 256;

/// How long a connector's sync lease lives without renewal.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(120);

/// Result of submitting a connector for sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: JobId,
    /// True when the connector already had a pending or running job.
    pub deduplicated: bool,
    /// The in-flight job belongs to another process sharing the database
    /// and cannot be waited on here.
    pub held_elsewhere: bool,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub connector_id: ConnectorId,
    pub connector_name: String,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
    pub phase: RunPhase,
    pub run: Option<SyncRun>,
    pub error: Option<String>,
}

struct JobRecord {
    id: JobId,
    connector: Connector,
    submitted_at: DateTime<Utc>,
    status: watch::Sender<JobStatus>,
    phase: Arc<watch::Sender<RunPhase>>,
    cancel: CancellationToken,
    run: Option<SyncRun>,
    error: Option<String>,
}

impl JobRecord {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            connector_id: self.connector.id.clone(),
            connector_name: self.connector.name.clone(),
            submitted_at: self.submitted_at,
            status: *self.status.borrow(),
            phase: self.phase.borrow().clone(),
            run: self.run.clone(),
            error: self.error.clone(),
        }
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, JobRecord>,
    /// Connector id to its pending or running job.
    active: HashMap<ConnectorId, JobId>,
    finished: VecDeque<JobId>,
}

struct Shared {
    orchestrator: Arc<Orchestrator>,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
    lease_ttl: Duration,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panicking holder leaves the maps usable
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn execute(&self, job_id: &str) {
        let started = self
            .registry()
            .jobs
            .get(job_id)
            .map(|job| (job.connector.clone(), job.cancel.clone(), job.phase.clone()));
        let Some((connector, cancel, phase)) = started else {
            warn!(job = job_id, "Dequeued unknown job");
            return;
        };

        if cancel.is_cancelled() {
            debug!(job = job_id, "Job cancelled before it started");
            self.finish(job_id, None, Some("cancelled before start".to_string()));
            return;
        }

        // The lease may have lapsed while the job was queued
        if !self.renew_lease(&connector.id, job_id).await {
            let error = "connector is syncing in another process".to_string();
            self.finish(job_id, None, Some(error));
            return;
        }

        self.set_status(job_id, JobStatus::Running);
        let span = info_span!("sync_job", job = job_id, connector = %connector.name);
        let run = self.orchestrator.run(&connector, &cancel, &phase).instrument(span);
        tokio::pin!(run);

        let mut heartbeat = tokio::time::interval(self.lease_ttl / 3);
        heartbeat.tick().await;
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = heartbeat.tick() => {
                    if !self.renew_lease(&connector.id, job_id).await {
                        warn!(job = job_id, "Lost sync lease, cancelling run");
                        cancel.cancel();
                    }
                }
            }
        };

        match result {
            Ok(run) => {
                let error = if run.cancelled {
                    Some("cancelled".to_string())
                } else {
                    None
                };
                self.finish(job_id, Some(run), error);
            }
            Err(err) => {
                error!(job = job_id, error = %err, "Sync run could not be recorded");
                self.finish(job_id, None, Some(err.to_string()));
            }
        }
    }

    /// Extend the job's lease. False when another holder owns it.
    async fn renew_lease(&self, connector_id: &str, job_id: &str) -> bool {
        let connector = connector_id.to_string();
        let (holder, ttl) = (job_id.to_string(), self.lease_ttl);
        match self
            .orchestrator
            .database()
            .blocking(move |db| db.claim_sync_lease(&connector, &holder, Utc::now(), ttl))
            .await
        {
            Ok(None) => true,
            Ok(Some(other)) => {
                warn!(job = job_id, holder = %other.holder, "Sync lease taken over");
                false
            }
            Err(err) => {
                warn!(job = job_id, error = %err, "Could not renew sync lease");
                true
            }
        }
    }

    fn set_status(&self, job_id: &str, status: JobStatus) {
        if let Some(job) = self.registry().jobs.get(job_id) {
            job.status.send_replace(status);
        }
    }

    fn finish(&self, job_id: &str, run: Option<SyncRun>, error: Option<String>) {
        let mut registry = self.registry();
        let status = match (&run, &error) {
            (Some(run), None) if run_succeeded(run) => JobStatus::Succeeded,
            _ => JobStatus::Failed,
        };

        let Some(job) = registry.jobs.get_mut(job_id) else {
            return;
        };
        job.run = run;
        job.error = error;
        let connector_id = job.connector.id.clone();

        // Free the connector before waiters observe the final status
        if registry.active.get(&connector_id).map(String::as_str) == Some(job_id) {
            registry.active.remove(&connector_id);
        }
        if let Err(err) = self
            .orchestrator
            .database()
            .release_sync_lease(&connector_id, job_id)
        {
            warn!(job = job_id, error = %err, "Could not release sync lease");
        }
        registry.finished.push_back(job_id.to_string());
        while registry.finished.len() > FINISHED_JOBS_RETAINED {
            if let Some(old) = registry.finished.pop_front() {
                registry.jobs.remove(&old);
            }
        }

        if let Some(job) = registry.jobs.get(job_id) {
            job.status.send_replace(status);
        }
        info!(job = job_id, status = %status, "Job finished");
    }
}

/// Fixed pool of workers executing sync jobs submitted through a channel.
///
/// A connector has at most one pending or running job; submitting it again
/// returns the existing job instead of queueing a second run. Exclusion
/// extends to other processes through a lease row in the database, renewed
/// while the job runs.
pub struct JobRunner {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<JobId>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobRunner {
    /// Start `workers` workers on the current runtime.
    pub fn new(orchestrator: Arc<Orchestrator>, workers: usize) -> Self {
        Self::with_lease_ttl(orchestrator, workers, DEFAULT_LEASE_TTL)
    }

    pub fn with_lease_ttl(orchestrator: Arc<Orchestrator>, workers: usize, lease_ttl: Duration) -> Self {
        let shared = Arc::new(Shared {
            orchestrator,
            registry: Mutex::new(Registry::default()),
            shutdown: CancellationToken::new(),
            lease_ttl: lease_ttl.max(Duration::from_secs(3)),
        });
        let (tx, rx) = mpsc::unbounded_channel::<JobId>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let shared = shared.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    debug!(worker, "Sync worker started");
                    loop {
                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                biased;
                                _ = shared.shutdown.cancelled() => None,
                                next = rx.recv() => next,
                            }
                        };
                        match next {
                            Some(job_id) => shared.execute(&job_id).await,
                            None => break,
                        }
                    }
                    debug!(worker, "Sync worker stopped");
                })
            })
            .collect();

        Self {
            shared,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Queue a sync of `connector`, or return its in-flight job.
    pub fn submit(&self, connector: &Connector) -> SyncResult<Submission> {
        if self.shared.shutdown.is_cancelled() {
            return Err(SyncError::ShutDown);
        }
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SyncError::ShutDown)?;

        let mut registry = self.shared.registry();
        if let Some(job_id) = registry.active.get(&connector.id) {
            debug!(connector = %connector.name, job = %job_id, "Sync already in flight");
            return Ok(Submission {
                job_id: job_id.clone(),
                deduplicated: true,
                held_elsewhere: false,
            });
        }

        let job_id = new_id();
        let db = self.shared.orchestrator.database();
        if let Some(lease) =
            db.claim_sync_lease(&connector.id, &job_id, Utc::now(), self.shared.lease_ttl)?
        {
            info!(
                connector = %connector.name,
                job = %lease.holder,
                "Sync already in flight in another process"
            );
            return Ok(Submission {
                job_id: lease.holder,
                deduplicated: true,
                held_elsewhere: true,
            });
        }

        let (status, _) = watch::channel(JobStatus::Pending);
        let (phase, _) = watch::channel(RunPhase::Idle);
        registry.jobs.insert(
            job_id.clone(),
            JobRecord {
                id: job_id.clone(),
                connector: connector.clone(),
                submitted_at: Utc::now(),
                status,
                phase: Arc::new(phase),
                cancel: self.shared.shutdown.child_token(),
                run: None,
                error: None,
            },
        );

        if queue.send(job_id.clone()).is_err() {
            registry.jobs.remove(&job_id);
            if let Err(err) = db.release_sync_lease(&connector.id, &job_id) {
                warn!(job = %job_id, error = %err, "Could not release sync lease");
            }
            return Err(SyncError::ShutDown);
        }
        registry.active.insert(connector.id.clone(), job_id.clone());

        info!(connector = %connector.name, job = %job_id, "Sync job submitted");
        Ok(Submission {
            job_id,
            deduplicated: false,
            held_elsewhere: false,
        })
    }

    pub fn status(&self, job_id: &str) -> SyncResult<JobSnapshot> {
        self.shared
            .registry()
            .jobs
            .get(job_id)
            .map(JobRecord::snapshot)
            .ok_or_else(|| SyncError::UnknownJob(job_id.to_string()))
    }

    /// All retained jobs, most recently submitted first.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .shared
            .registry()
            .jobs
            .values()
            .map(JobRecord::snapshot)
            .collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        jobs
    }

    /// The pending or running job of a connector.
    pub fn active_job(&self, connector_id: &str) -> Option<JobId> {
        self.shared.registry().active.get(connector_id).cloned()
    }

    /// Connectors with a pending or running job here.
    pub fn active_connectors(&self) -> Vec<ConnectorId> {
        self.shared.registry().active.keys().cloned().collect()
    }

    /// Follow a job's run phase as it changes.
    pub fn subscribe_phase(&self, job_id: &str) -> SyncResult<watch::Receiver<RunPhase>> {
        self.shared
            .registry()
            .jobs
            .get(job_id)
            .map(|job| job.phase.subscribe())
            .ok_or_else(|| SyncError::UnknownJob(job_id.to_string()))
    }

    /// Wait until a job has succeeded or failed.
    pub async fn wait(&self, job_id: &str) -> SyncResult<JobSnapshot> {
        let mut status = self
            .shared
            .registry()
            .jobs
            .get(job_id)
            .map(|job| job.status.subscribe())
            .ok_or_else(|| SyncError::UnknownJob(job_id.to_string()))?;

        status
            .wait_for(|s| !s.is_active())
            .await
            .map_err(|_| SyncError::UnknownJob(job_id.to_string()))?;
        self.status(job_id)
    }

    /// Cancel the in-flight job of a connector. Returns false if it had none.
    pub fn cancel(&self, connector_id: &str) -> bool {
        let registry = self.shared.registry();
        let job = registry
            .active
            .get(connector_id)
            .and_then(|job_id| registry.jobs.get(job_id));
        match job {
            Some(job) => {
                info!(connector = connector_id, job = %job.id, "Cancelling sync job");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting jobs, cancel running ones and wait for the workers.
    pub async fn shutdown(&self) {
        info!("Shutting down job runner");
        self.shared.shutdown.cancel();
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "Sync worker ended abnormally");
            }
        }

        let stranded: Vec<JobId> = self
            .shared
            .registry()
            .active
            .values()
            .cloned()
            .collect();
        for job_id in stranded {
            self.shared
                .finish(&job_id, None, Some("job runner shut down".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_orchestrator, ScriptedStore};
    use kbsync_core::{FileScope, ProviderKind, RunStatus};
    use kbsync_db::Database;

    struct Fixture {
        db: Database,
        store: Arc<ScriptedStore>,
        runner: JobRunner,
    }

    fn fixture(workers: usize) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(ScriptedStore::new());
        let orchestrator = Arc::new(scripted_orchestrator(&db, store.clone()));
        Fixture {
            db,
            store,
            runner: JobRunner::new(orchestrator, workers),
        }
    }

    fn connector(db: &Database, name: &str) -> Connector {
        let connector = Connector::new(name, ProviderKind::GoogleDrive, FileScope::default());
        db.create_connector(&connector).unwrap();
        connector
    }

    async fn reach_phase(runner: &JobRunner, job_id: &str, phase: RunPhase) {
        let mut rx = runner.subscribe_phase(job_id).unwrap();
        rx.wait_for(|p| *p == phase).await.unwrap();
    }

    #[tokio::test]
    async fn test_submitted_job_runs_to_completion() {
        let f = fixture(2);
        let c = connector(&f.db, "drive");
        f.store.put("a.txt", "Hello there.");

        let submission = f.runner.submit(&c).unwrap();
        assert!(!submission.deduplicated);

        let job = f.runner.wait(&submission.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.connector_id, c.id);
        let run = job.run.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.files_processed, 1);
        assert!(f.runner.active_job(&c.id).is_none());
    }

    #[tokio::test]
    async fn test_failed_listing_fails_the_job() {
        let f = fixture(1);
        let c = connector(&f.db, "drive");
        f.store.set_listing_fails(true);

        let submission = f.runner.submit(&c).unwrap();
        let job = f.runner.wait(&submission.job_id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.run.unwrap().status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_second_trigger_is_deduplicated() {
        let f = fixture(2);
        let c = connector(&f.db, "drive");
        f.store.put("a.txt", "Hello there.");
        let gate = f.store.hold_listing();

        let first = f.runner.submit(&c).unwrap();
        reach_phase(&f.runner, &first.job_id, RunPhase::Listing).await;
        let second = f.runner.submit(&c).unwrap();

        assert!(second.deduplicated);
        assert_eq!(second.job_id, first.job_id);

        gate.add_permits(1);
        f.runner.wait(&first.job_id).await.unwrap();
        assert_eq!(f.db.list_runs(Some(&c.id), 10).unwrap().len(), 1);

        let third = f.runner.submit(&c).unwrap();
        assert!(!third.deduplicated);
        assert_ne!(third.job_id, first.job_id);
    }

    #[tokio::test]
    async fn test_connectors_run_concurrently() {
        let f = fixture(2);
        let a = connector(&f.db, "a");
        let b = connector(&f.db, "b");
        let gate = f.store.hold_listing();

        let job_a = f.runner.submit(&a).unwrap().job_id;
        let job_b = f.runner.submit(&b).unwrap().job_id;
        reach_phase(&f.runner, &job_a, RunPhase::Listing).await;
        reach_phase(&f.runner, &job_b, RunPhase::Listing).await;

        assert_eq!(f.runner.status(&job_a).unwrap().status, JobStatus::Running);
        assert_eq!(f.runner.status(&job_b).unwrap().status, JobStatus::Running);

        gate.add_permits(2);
        assert_eq!(f.runner.wait(&job_a).await.unwrap().status, JobStatus::Succeeded);
        assert_eq!(f.runner.wait(&job_b).await.unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let f = fixture(1);
        let c = connector(&f.db, "drive");
        f.store.put("a.txt", "Hello there.");
        let _gate = f.store.hold_listing();

        let job_id = f.runner.submit(&c).unwrap().job_id;
        reach_phase(&f.runner, &job_id, RunPhase::Listing).await;

        assert!(f.runner.cancel(&c.id));
        let job = f.runner.wait(&job_id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.run.unwrap().cancelled);
        assert!(f.db.list_file_states(&c.id).unwrap().is_empty());
        assert!(f.db.sync_lease(&c.id, Utc::now()).unwrap().is_none());
        assert!(!f.runner.cancel(&c.id));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let f = fixture(1);
        assert!(matches!(
            f.runner.status("nope"),
            Err(SyncError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let f = fixture(2);
        let c = connector(&f.db, "drive");

        f.runner.shutdown().await;

        assert!(matches!(f.runner.submit(&c), Err(SyncError::ShutDown)));
    }

    #[tokio::test]
    async fn test_jobs_lists_newest_first() {
        let f = fixture(1);
        let a = connector(&f.db, "a");
        let b = connector(&f.db, "b");

        let first = f.runner.submit(&a).unwrap().job_id;
        f.runner.wait(&first).await.unwrap();
        let second = f.runner.submit(&b).unwrap().job_id;
        f.runner.wait(&second).await.unwrap();

        let ids: Vec<JobId> = f.runner.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_runners_sharing_a_database_do_not_overlap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kbsync.db");
        let db_a = Database::open(&path).unwrap();
        let db_b = Database::open(&path).unwrap();
        let store = Arc::new(ScriptedStore::new());
        store.put("a.txt", "Hello there.");
        let runner_a = JobRunner::new(Arc::new(scripted_orchestrator(&db_a, store.clone())), 1);
        let runner_b = JobRunner::new(Arc::new(scripted_orchestrator(&db_b, store.clone())), 1);
        let c = connector(&db_a, "drive");
        let gate = store.hold_listing();

        let first = runner_a.submit(&c).unwrap();
        reach_phase(&runner_a, &first.job_id, RunPhase::Listing).await;
        let second = runner_b.submit(&c).unwrap();

        assert!(second.deduplicated);
        assert!(second.held_elsewhere);
        assert_eq!(second.job_id, first.job_id);
        assert!(runner_b.active_job(&c.id).is_none());

        gate.add_permits(1);
        let job = runner_a.wait(&first.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.run.unwrap().errors.is_empty());
        assert_eq!(db_b.list_runs(Some(&c.id), 10).unwrap().len(), 1);

        let third = runner_b.submit(&c).unwrap();
        assert!(!third.deduplicated);
        assert!(!third.held_elsewhere);
        let job = runner_b.wait(&third.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.run.unwrap().files_unchanged, 1);
    }

    #[tokio::test]
    async fn test_lapsed_lease_does_not_block_new_runs() {
        let f = fixture(1);
        let c = connector(&f.db, "drive");
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        f.db
            .claim_sync_lease(&c.id, "crashed-process", long_ago, DEFAULT_LEASE_TTL)
            .unwrap();

        let submission = f.runner.submit(&c).unwrap();

        assert!(!submission.deduplicated);
        let job = f.runner.wait(&submission.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }
}
