//! Sync Orchestrator: drives one connector's run from listing to the run log.

use crate::error::SyncResult;
use crate::gate::{EmbeddingGate, GateConfig};
use crate::writer::IndexWriter;
use futures_util::stream::{self, StreamExt};
use kbsync_config::Config;
use kbsync_core::{
    Chunk, Connector, EmbeddingBackend, Error, FileError, FileOutcome, FileScope, FileSyncState,
    IndexEntry, RemoteFile, Result, RunBuilder, RunPhase, RunStatus, SyncRun, VectorStore,
};
use kbsync_db::Database;
use kbsync_ingest::{detect_changes, ChunkConfig, ContentStores, DocumentProcessor, PendingFile};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Per-run limits.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub file_timeout: Duration,
    pub max_concurrent_files: usize,
    /// Applied when a connector's scope sets no size limit.
    pub max_file_size_mb: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            file_timeout: Duration::from_secs(300),
            max_concurrent_files: 4,
            max_file_size_mb: 10,
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            file_timeout: Duration::from_secs(config.sync.file_timeout_seconds.max(1)),
            max_concurrent_files: config.sync.max_concurrent_files.max(1),
            max_file_size_mb: config.processing.max_file_size_mb,
        }
    }
}

/// Runs sync passes for connectors.
///
/// A run lists the connector's files, classifies them against stored sync
/// state, removes deleted files, processes changed ones and appends the run
/// to the log. File failures are recorded and never stop the run; only a
/// failed listing does.
pub struct Orchestrator {
    db: Database,
    stores: ContentStores,
    processor: DocumentProcessor,
    gate: EmbeddingGate,
    writer: IndexWriter,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        stores: ContentStores,
        processor: DocumentProcessor,
        gate: EmbeddingGate,
        writer: IndexWriter,
        settings: RunSettings,
    ) -> Self {
        Self {
            db,
            stores,
            processor,
            gate,
            writer,
            settings,
        }
    }

    /// Wire an orchestrator whose vector store is the database itself.
    pub fn from_config(
        config: &Config,
        db: Database,
        stores: ContentStores,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        let vectors: Arc<dyn VectorStore> = Arc::new(db.clone());
        Self::new(
            db,
            stores,
            DocumentProcessor::new(ChunkConfig::from_processing_config(&config.processing)),
            EmbeddingGate::new(backend, GateConfig::from_config(config)),
            IndexWriter::new(vectors),
            RunSettings::from_config(config),
        )
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn gate(&self) -> &EmbeddingGate {
        &self.gate
    }

    /// Run once with no cancellation and no phase observers.
    pub async fn run_once(&self, connector: &Connector) -> SyncResult<SyncRun> {
        let (phase, _) = watch::channel(RunPhase::Idle);
        self.run(connector, &CancellationToken::new(), &phase).await
    }

    /// Execute one sync run and append it to the run log.
    ///
    /// Cancellation stops new file work; files not finished are left with
    /// their previous state for the next run. The returned error covers only
    /// failures to write the run log itself.
    pub async fn run(
        &self,
        connector: &Connector,
        cancel: &CancellationToken,
        phase: &watch::Sender<RunPhase>,
    ) -> SyncResult<SyncRun> {
        let run = RunBuilder::begin(&connector.id);
        let span = info_span!("sync_run", connector = %connector.name, run_id = %run.id());

        async move {
            let run = self.execute(connector, run, cancel, phase).await;
            self.record(connector, run, phase).await
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        connector: &Connector,
        mut run: RunBuilder,
        cancel: &CancellationToken,
        phase: &watch::Sender<RunPhase>,
    ) -> SyncRun {
        info!(provider = %connector.provider, "Starting sync");

        phase.send_replace(RunPhase::Listing);
        let listing = match self.list(connector, cancel).await {
            Ok(files) => files,
            Err(err) => {
                warn!(error = %err, "Listing failed, aborting run");
                if matches!(err, Error::Cancelled) {
                    run.mark_cancelled();
                }
                return run.fail(FileError::for_connector(&err));
            }
        };

        phase.send_replace(RunPhase::Diffing);
        let connector_id = connector.id.clone();
        let stored = match self
            .db
            .blocking(move |db| db.list_file_states(&connector_id))
            .await
        {
            Ok(states) => states,
            Err(err) => {
                let err = Error::from(err);
                warn!(error = %err, "Could not read sync state, aborting run");
                return run.fail(FileError::for_connector(&err));
            }
        };

        let changes = detect_changes(listing, stored);
        info!(
            to_process = changes.to_process.len(),
            to_delete = changes.to_delete.len(),
            unchanged = changes.unchanged.len(),
            "Classified files"
        );

        for _ in &changes.unchanged {
            run.record(FileOutcome::Skipped);
        }

        for state in changes.to_delete {
            if cancel.is_cancelled() {
                run.mark_cancelled();
                break;
            }
            let outcome = match self.delete_file(connector, &state).await {
                Ok(()) => FileOutcome::Deleted,
                Err(err) => {
                    warn!(file = %state.file_id, error = %err, "Failed to remove deleted file");
                    FileOutcome::Failed(FileError::for_file(&state.file_id, &err))
                }
            };
            run.record(outcome);
        }

        let outcomes: Vec<Option<FileOutcome>> = stream::iter(changes.to_process)
            .map(|pending| self.process_guarded(connector, pending, cancel, phase))
            .buffer_unordered(self.settings.max_concurrent_files.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Some(outcome) => run.record(outcome),
                None => run.mark_cancelled(),
            }
        }

        run.complete()
    }

    async fn record(
        &self,
        connector: &Connector,
        run: SyncRun,
        phase: &watch::Sender<RunPhase>,
    ) -> SyncResult<SyncRun> {
        phase.send_replace(RunPhase::Recording);
        let logged = run.clone();
        self.db.blocking(move |db| db.append_run(&logged)).await?;

        // Abandoned work is retried on the next tick, not a cadence later
        if !run.cancelled {
            let (connector_id, completed_at) = (connector.id.clone(), run.completed_at);
            if let Err(err) = self
                .db
                .blocking(move |db| db.update_last_sync(&connector_id, completed_at))
                .await
            {
                warn!(error = %err, "Could not update connector's last sync time");
            }
        }

        info!(
            status = %run.status,
            processed = run.files_processed,
            deleted = run.files_deleted,
            unchanged = run.files_unchanged,
            errors = run.errors.len(),
            cancelled = run.cancelled,
            "Sync finished"
        );
        phase.send_replace(RunPhase::Completed(run.status));
        Ok(run)
    }

    async fn list(&self, connector: &Connector, cancel: &CancellationToken) -> Result<Vec<RemoteFile>> {
        let store = self.stores.for_connector(connector)?;
        let scope = self.effective_scope(connector);
        let scoped = Connector {
            scope: scope.clone(),
            ..connector.clone()
        };
        let files = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            listed = store.list(&scoped) => listed?,
        };

        let total = files.len();
        let admitted: Vec<RemoteFile> = files.into_iter().filter(|f| scope.admits(f)).collect();
        if admitted.len() < total {
            debug!(excluded = total - admitted.len(), "Files outside connector scope");
        }
        Ok(admitted)
    }

    fn effective_scope(&self, connector: &Connector) -> FileScope {
        let mut scope = connector.scope.clone();
        if scope.max_size_mb.is_none() {
            scope.max_size_mb = Some(self.settings.max_file_size_mb);
        }
        scope
    }

    /// Remove a file from the index and forget its state.
    ///
    /// The state stops claiming its keys before any entry is removed, so an
    /// interruption at any step leaves a row the next run deletes again.
    async fn delete_file(&self, connector: &Connector, state: &FileSyncState) -> Result<()> {
        let withdrawn = FileSyncState {
            processed: false,
            ..state.clone()
        };
        let withdrawn = self
            .db
            .blocking(move |db| db.commit_file_state(&withdrawn))
            .await?;

        let removed = self
            .writer
            .remove_document(&connector.id, &state.file_id, &state.index_keys)
            .await?;

        let (connector_id, file_id) = (connector.id.clone(), state.file_id.clone());
        self.db
            .blocking(move |db| db.delete_file_state(&connector_id, &file_id, withdrawn.version))
            .await?;
        info!(file = %state.file_id, removed, "Removed deleted file");
        Ok(())
    }

    /// Process one file under the run's timeout and cancellation.
    ///
    /// `None` means the file was never started or was abandoned.
    async fn process_guarded(
        &self,
        connector: &Connector,
        pending: PendingFile,
        cancel: &CancellationToken,
        phase: &watch::Sender<RunPhase>,
    ) -> Option<FileOutcome> {
        if cancel.is_cancelled() {
            return None;
        }

        let file_id = pending.file.file_id.clone();
        phase.send_replace(RunPhase::Processing {
            file_id: file_id.clone(),
        });
        let limit = self.settings.file_timeout;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(file = %file_id, "Abandoned file after cancellation");
                None
            }
            result = tokio::time::timeout(limit, self.process_file(connector, pending)) => {
                let err = match result {
                    Ok(Ok(outcome)) => return Some(outcome),
                    Ok(Err(err)) => err,
                    Err(_) => Error::Timeout { seconds: limit.as_secs() },
                };
                warn!(file = %file_id, error = %err, "File failed");
                Some(FileOutcome::Failed(FileError::for_file(&file_id, &err)))
            }
        }
    }

    async fn process_file(&self, connector: &Connector, pending: PendingFile) -> Result<FileOutcome> {
        let PendingFile { file, previous } = pending;
        let store = self.stores.for_connector(connector)?;

        let bytes = match store.read(connector, &file).await {
            Ok(bytes) => bytes,
            Err(Error::NotFound(_)) => {
                info!(file = %file.file_id, "File vanished after listing");
                return self.remove_vanished(connector, &file, previous).await;
            }
            Err(err) => return Err(err),
        };

        let processor = self.processor.clone();
        let connector_id = connector.id.clone();
        let remote = file.clone();
        let (format, chunks) = tokio::task::spawn_blocking(move || {
            let document = processor.process(&connector_id, &remote, &bytes)?;
            let chunks: Vec<Chunk> = document.chunks().collect();
            Ok::<_, Error>((document.format, chunks))
        })
        .await
        .map_err(|e| Error::ExtractionFailed(format!("extraction task failed: {}", e)))??;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.gate.embed(&texts).await?;

        let count = chunks.len();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                key: chunk.key,
                vector,
                text: chunk.text,
                path: file.path.clone(),
                format: Some(format),
            })
            .collect();

        let prior_keys = previous.as_ref().map(|p| p.index_keys.as_slice()).unwrap_or(&[]);
        let keys = self
            .writer
            .upsert_document(&connector.id, &file.file_id, entries, prior_keys)
            .await?;

        // The index write is durable; only now may the state claim it
        let mut state = FileSyncState::processed(&connector.id, &file, keys);
        state.version = previous.map(|p| p.version).unwrap_or(0);
        self.db.blocking(move |db| db.commit_file_state(&state)).await?;

        debug!(file = %file.file_id, chunks = count, "Processed file");
        Ok(FileOutcome::Processed { chunks: count })
    }

    async fn remove_vanished(
        &self,
        connector: &Connector,
        file: &RemoteFile,
        previous: Option<FileSyncState>,
    ) -> Result<FileOutcome> {
        match previous {
            Some(state) => self.delete_file(connector, &state).await?,
            None => {
                self.writer
                    .remove_document(&connector.id, &file.file_id, &[])
                    .await?;
            }
        }
        Ok(FileOutcome::Deleted)
    }
}

/// Status a finished run maps to for job bookkeeping.
pub fn run_succeeded(run: &SyncRun) -> bool {
    run.status != RunStatus::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HashEmbedder, RecordingVectorStore, ScriptedStore};
    use kbsync_core::{ErrorKind, IndexKey, ProviderKind};

    const LONG_V1: &str = "The first version of this document talks about apples and pears. \
        It keeps going for a while so that it spans several chunks of text. \
        The final sentence mentions plums.";
    const SHORT_V2: &str = "Version two is short.";

    struct Harness {
        db: Database,
        store: Arc<ScriptedStore>,
        embedder: Arc<HashEmbedder>,
        vectors: Arc<RecordingVectorStore>,
        orchestrator: Orchestrator,
        connector: Connector,
    }

    fn harness_with(settings: RunSettings) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let connector = Connector::new("drive", ProviderKind::GoogleDrive, FileScope::default());
        db.create_connector(&connector).unwrap();

        let store = Arc::new(ScriptedStore::new());
        let embedder = Arc::new(HashEmbedder::new(4));
        let vectors = Arc::new(RecordingVectorStore::new(db.clone()));

        let orchestrator = Orchestrator::new(
            db.clone(),
            ContentStores::empty().register(ProviderKind::GoogleDrive, store.clone()),
            DocumentProcessor::new(ChunkConfig {
                chunk_size: 40,
                chunk_overlap: 8,
            }),
            EmbeddingGate::new(embedder.clone(), GateConfig::default()),
            IndexWriter::new(vectors.clone()),
            settings,
        );

        Harness {
            db,
            store,
            embedder,
            vectors,
            orchestrator,
            connector,
        }
    }

    fn harness() -> Harness {
        harness_with(RunSettings::default())
    }

    impl Harness {
        async fn sync(&self) -> SyncRun {
            self.orchestrator.run_once(&self.connector).await.unwrap()
        }

        fn state(&self, file_id: &str) -> Option<FileSyncState> {
            self.db.get_file_state(&self.connector.id, file_id).unwrap()
        }

        fn tracked(&self) -> Vec<String> {
            self.db
                .list_file_states(&self.connector.id)
                .unwrap()
                .into_iter()
                .map(|s| s.file_id)
                .collect()
        }

        fn entry_keys(&self, file_id: &str) -> Vec<IndexKey> {
            self.db
                .entries_for_file(&self.connector.id, file_id)
                .unwrap()
                .into_iter()
                .map(|e| e.key)
                .collect()
        }

        /// Every processed state's keys exist and nothing else does.
        ///
        /// A withdrawn state may still hold some of its old entries.
        fn assert_consistent(&self) {
            let states = self.db.list_file_states(&self.connector.id).unwrap();
            let mut tracked = 0;
            for state in &states {
                let mut stored = self.entry_keys(&state.file_id);
                stored.sort();
                if state.processed {
                    let mut expected = state.index_keys.clone();
                    expected.sort();
                    assert_eq!(stored, expected, "entries of {}", state.file_id);
                } else {
                    assert!(stored.iter().all(|k| state.index_keys.contains(k)));
                }
                tracked += stored.len() as i64;
            }
            assert_eq!(
                self.db.count_index_entries(Some(&self.connector.id)).unwrap(),
                tracked
            );
        }
    }

    #[tokio::test]
    async fn test_first_sync_indexes_every_file() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.store.put("b.md", "# Notes\n\nSome markdown notes.");

        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.files_processed, 2);
        assert!(run.errors.is_empty());
        assert_eq!(h.tracked(), vec!["a.txt", "b.md"]);
        assert!(h.state("a.txt").unwrap().index_keys.len() > 1);
        h.assert_consistent();

        let connector = h.db.get_connector(&h.connector.id).unwrap();
        assert_eq!(connector.last_sync, Some(run.completed_at));
        let runs = h.db.list_runs(Some(&h.connector.id), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_second_run_without_changes_is_idempotent() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.store.put("b.txt", SHORT_V2);
        h.sync().await;

        let states_before = h.db.list_file_states(&h.connector.id).unwrap();
        let writes = h.vectors.writes();
        let calls = h.embedder.calls();
        let reads = h.store.total_reads();

        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.files_processed, 0);
        assert_eq!(run.files_unchanged, 2);
        assert_eq!(h.vectors.writes(), writes);
        assert_eq!(h.embedder.calls(), calls);
        assert_eq!(h.store.total_reads(), reads);
        assert_eq!(h.db.list_file_states(&h.connector.id).unwrap(), states_before);
    }

    #[tokio::test]
    async fn test_modified_file_leaves_no_stale_chunks() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.sync().await;
        let before = h.entry_keys("a.txt");
        assert!(before.len() > 1);

        h.store.put("a.txt", SHORT_V2);
        let run = h.sync().await;

        assert_eq!(run.files_processed, 1);
        let entries = h.db.entries_for_file(&h.connector.id, "a.txt").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, SHORT_V2);
        assert_eq!(h.state("a.txt").unwrap().version, 2);
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_deleted_file_is_removed() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.store.put("b.txt", SHORT_V2);
        h.sync().await;

        h.store.remove("b.txt");
        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.files_deleted, 1);
        assert!(h.state("b.txt").is_none());
        assert!(h.entry_keys("b.txt").is_empty());
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_failed_file_does_not_block_others() {
        let h = harness();
        h.store.put_bytes("a.pdf", b"definitely not a pdf");
        h.store.put("b.txt", SHORT_V2);

        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::PartialSuccess);
        assert_eq!(run.files_processed, 1);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].file_id.as_deref(), Some("a.pdf"));
        assert_eq!(run.errors[0].kind, ErrorKind::ExtractionFailed);
        assert!(h.state("a.pdf").is_none());
        assert!(h.state("b.txt").unwrap().processed);
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_previous_version() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.store.put("b.txt", SHORT_V2);
        h.sync().await;
        let state_before = h.state("a.txt").unwrap();
        let keys_before = h.entry_keys("a.txt");

        h.embedder.fail_on("POISON");
        h.store.put("a.txt", "This revision contains POISON and cannot be embedded.");
        h.store.put("c.txt", "A brand new file.");
        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::PartialSuccess);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].file_id.as_deref(), Some("a.txt"));
        assert_eq!(run.errors[0].kind, ErrorKind::EmbeddingFailed);
        assert_eq!(h.state("a.txt").unwrap(), state_before);
        assert_eq!(h.entry_keys("a.txt"), keys_before);
        assert!(h.state("c.txt").is_some());
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_index_write_failure_is_not_recorded_processed() {
        let h = harness();
        h.store.put("a.txt", SHORT_V2);
        h.store.put("b.txt", "Another file.");
        h.vectors.refuse_file("a.txt");

        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::PartialSuccess);
        assert_eq!(run.errors[0].kind, ErrorKind::IndexWriteFailed);
        assert!(h.state("a.txt").is_none());
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_run() {
        let h = harness();
        h.store.put("a.txt", SHORT_V2);
        h.store.set_listing_fails(true);

        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].file_id, None);
        assert_eq!(run.errors[0].kind, ErrorKind::SourceUnavailable);
        assert_eq!(h.store.total_reads(), 0);
        assert!(h.tracked().is_empty());
        assert_eq!(h.db.list_runs(Some(&h.connector.id), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_after_interrupted_commit_does_not_duplicate() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);

        // Index written but the process died before the state commit
        let orphans: Vec<IndexEntry> = (0..12)
            .map(|ordinal| IndexEntry {
                key: IndexKey::new(&h.connector.id, "a.txt", ordinal),
                vector: vec![0.0; 4],
                text: "orphan".to_string(),
                path: "a.txt".to_string(),
                format: None,
            })
            .collect();
        h.orchestrator
            .writer
            .upsert_document(&h.connector.id, "a.txt", orphans, &[])
            .await
            .unwrap();

        let run = h.sync().await;

        assert_eq!(run.files_processed, 1);
        assert_eq!(h.store.reads("a.txt"), 1);
        let entries = h.db.entries_for_file(&h.connector.id, "a.txt").unwrap();
        assert!(entries.iter().all(|e| e.text != "orphan"));
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_file_vanished_after_listing_is_deleted() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.sync().await;

        h.store.put("a.txt", SHORT_V2);
        h.store.vanish_on_read("a.txt");
        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.files_deleted, 1);
        assert!(h.state("a.txt").is_none());
        assert!(h.entry_keys("a.txt").is_empty());
    }

    #[tokio::test]
    async fn test_scope_filters_exclude_files() {
        let h = harness();
        let connector = Connector {
            scope: FileScope::default().with_extensions(vec![".md".to_string()]),
            ..h.connector.clone()
        };
        h.store.put("a.txt", SHORT_V2);
        h.store.put("b.md", "# Kept");

        let run = h.orchestrator.run_once(&connector).await.unwrap();

        assert_eq!(run.files_processed, 1);
        assert_eq!(h.tracked(), vec!["b.md"]);
    }

    #[tokio::test]
    async fn test_add_modify_delete_scenario() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.store.put("b.txt", "B version one.");
        let first = h.sync().await;
        assert_eq!(first.status, RunStatus::Success);
        assert_eq!(h.tracked(), vec!["a.txt", "b.txt"]);

        h.store.put("a.txt", SHORT_V2);
        h.store.remove("b.txt");
        h.store.put("c.txt", "C version one.");
        let second = h.sync().await;

        assert_eq!(second.status, RunStatus::Success);
        assert_eq!(second.files_processed, 2);
        assert_eq!(second.files_deleted, 1);
        assert_eq!(h.tracked(), vec!["a.txt", "c.txt"]);
        assert!(h.entry_keys("b.txt").is_empty());

        let a = h.db.entries_for_file(&h.connector.id, "a.txt").unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].text, SHORT_V2);
        h.assert_consistent();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_file_times_out() {
        let h = harness_with(RunSettings {
            file_timeout: Duration::from_secs(1),
            ..Default::default()
        });
        h.embedder.set_delay(Duration::from_secs(30));
        h.store.put("a.txt", SHORT_V2);

        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::PartialSuccess);
        assert_eq!(run.errors[0].kind, ErrorKind::Timeout);
        assert!(h.state("a.txt").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_records_nothing_new() {
        let h = harness();
        h.store.put("a.txt", SHORT_V2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (phase, _) = watch::channel(RunPhase::Idle);

        let run = h.orchestrator.run(&h.connector, &cancel, &phase).await.unwrap();

        assert!(run.cancelled);
        assert_eq!(run.errors[0].kind, ErrorKind::Cancelled);
        assert!(h.tracked().is_empty());
        assert_eq!(h.db.list_runs(Some(&h.connector.id), 10).unwrap().len(), 1);
        assert!(h.db.get_connector(&h.connector.id).unwrap().last_sync.is_none());
    }

    #[tokio::test]
    async fn test_delete_against_newer_state_keeps_file_indexed() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.sync().await;
        let stale = h.state("a.txt").unwrap();
        // A concurrent writer moves the state on
        h.db.commit_file_state(&stale).unwrap();

        let err = h.orchestrator.delete_file(&h.connector, &stale).await.unwrap_err();

        assert!(matches!(err, Error::StateConflict(_)));
        let state = h.state("a.txt").unwrap();
        assert!(state.processed);
        assert_eq!(state.version, 2);
        assert_eq!(h.entry_keys("a.txt").len(), stale.index_keys.len());
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_interrupted_delete_is_finished_next_run() {
        let h = harness();
        h.store.put("a.txt", LONG_V1);
        h.store.put("b.txt", SHORT_V2);
        h.sync().await;

        h.store.remove("b.txt");
        h.vectors.refuse_file("b.txt");
        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::PartialSuccess);
        assert_eq!(run.errors[0].file_id.as_deref(), Some("b.txt"));
        assert_eq!(run.errors[0].kind, ErrorKind::IndexWriteFailed);
        assert!(!h.state("b.txt").unwrap().processed);
        h.assert_consistent();

        h.vectors.allow_all();
        let run = h.sync().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.files_deleted, 1);
        assert!(h.state("b.txt").is_none());
        assert!(h.entry_keys("b.txt").is_empty());
        h.assert_consistent();
    }

    #[tokio::test]
    async fn test_phase_reaches_completed() {
        let h = harness();
        h.store.put("a.txt", SHORT_V2);
        let (phase, observer) = watch::channel(RunPhase::Idle);

        h.orchestrator
            .run(&h.connector, &CancellationToken::new(), &phase)
            .await
            .unwrap();

        assert_eq!(*observer.borrow(), RunPhase::Completed(RunStatus::Success));
    }
}
