//! In-memory capability fakes shared by this crate's tests.

use async_trait::async_trait;
use kbsync_core::{
    BackendError, Connector, ContentStore, EmbeddingBackend, Error, IndexEntry, IndexKey,
    ModificationSignature, RemoteFile, Result, VectorStore,
};
use crate::gate::{EmbeddingGate, GateConfig};
use crate::orchestrator::{Orchestrator, RunSettings};
use crate::writer::IndexWriter;
use kbsync_core::ProviderKind;
use kbsync_db::Database;
use kbsync_ingest::{ChunkConfig, ContentStores, DocumentProcessor};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

fn content_hash(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Content store backed by a map of file id to bytes.
#[derive(Default)]
pub struct ScriptedStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    vanished: Mutex<HashSet<String>>,
    listing_fails: Mutex<bool>,
    listing_gate: Mutex<Option<Arc<Semaphore>>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, file_id: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(file_id.to_string(), content.as_bytes().to_vec());
    }

    pub fn put_bytes(&self, file_id: &str, content: &[u8]) {
        self.files.lock().unwrap().insert(file_id.to_string(), content.to_vec());
    }

    pub fn remove(&self, file_id: &str) {
        self.files.lock().unwrap().remove(file_id);
    }

    /// Keep listing the file but fail its read with `NotFound`.
    pub fn vanish_on_read(&self, file_id: &str) {
        self.vanished.lock().unwrap().insert(file_id.to_string());
    }

    pub fn set_listing_fails(&self, fails: bool) {
        *self.listing_fails.lock().unwrap() = fails;
    }

    /// Block listings until permits are added to the returned semaphore.
    pub fn hold_listing(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.listing_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn reads(&self, file_id: &str) -> usize {
        self.reads.lock().unwrap().get(file_id).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> usize {
        self.reads.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ContentStore for ScriptedStore {
    async fn list(&self, _connector: &Connector) -> Result<Vec<RemoteFile>> {
        let gate = self.listing_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| Error::SourceUnavailable("gate closed".into()))?;
        }

        if *self.listing_fails.lock().unwrap() {
            return Err(Error::SourceUnavailable("remote unreachable".into()));
        }

        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(id, content)| {
                RemoteFile::new(
                    id.as_str(),
                    id.as_str(),
                    ModificationSignature::from_hash(content_hash(content)),
                )
                .with_size(content.len() as u64)
            })
            .collect())
    }

    async fn read(&self, _connector: &Connector, file: &RemoteFile) -> Result<Vec<u8>> {
        *self
            .reads
            .lock()
            .unwrap()
            .entry(file.file_id.clone())
            .or_default() += 1;

        if self.vanished.lock().unwrap().contains(&file.file_id) {
            return Err(Error::NotFound(file.file_id.clone()));
        }
        self.files
            .lock()
            .unwrap()
            .get(&file.file_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(file.file_id.clone()))
    }
}

#[derive(Default)]
struct EmbedScript {
    fail_next: u32,
    fail_next_err: Option<BackendError>,
    fail_after: Option<(usize, BackendError)>,
    fail_on: Vec<String>,
    delay: Option<Duration>,
}

/// Deterministic embedding backend with scriptable failures.
pub struct HashEmbedder {
    dims: usize,
    calls: AtomicUsize,
    script: Mutex<EmbedScript>,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
            script: Mutex::new(EmbedScript::default()),
        }
    }

    pub fn vector_for(text: &str, dims: usize) -> Vec<f32> {
        let mut vector = vec![1.0f32; dims];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % dims] += byte as f32 / 255.0;
        }
        vector
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` calls with `err`.
    pub fn fail_next(&self, n: u32, err: BackendError) {
        let mut script = self.script.lock().unwrap();
        script.fail_next = n;
        script.fail_next_err = Some(err);
    }

    /// Fail every call after the first `ok_calls` calls.
    pub fn fail_after(&self, ok_calls: usize, err: BackendError) {
        self.script.lock().unwrap().fail_after = Some((ok_calls, err));
    }

    /// Sleep this long before answering each call.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = Some(delay);
    }

    /// Reject any batch containing a text with `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.script.lock().unwrap().fail_on.push(needle.to_string());
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut script = self.script.lock().unwrap();
            if script.fail_next > 0 {
                script.fail_next -= 1;
                if let Some(ref err) = script.fail_next_err {
                    return Err(err.clone());
                }
            }
            if let Some((ok_calls, err)) = &script.fail_after {
                if call >= *ok_calls {
                    return Err(err.clone());
                }
            }
            if texts
                .iter()
                .any(|t| script.fail_on.iter().any(|needle| t.contains(needle.as_str())))
            {
                return Err(BackendError::InvalidInput("rejected text".into()));
            }
        }

        Ok(texts.iter().map(|t| Self::vector_for(t, self.dims)).collect())
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }
}

/// Vector store over a database that counts writes and can refuse some files.
pub struct RecordingVectorStore {
    inner: Database,
    writes: AtomicUsize,
    refuse: Mutex<HashSet<String>>,
}

impl RecordingVectorStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            refuse: Mutex::new(HashSet::new()),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fail writes touching `file_id`.
    pub fn refuse_file(&self, file_id: &str) {
        self.refuse.lock().unwrap().insert(file_id.to_string());
    }

    pub fn allow_all(&self) {
        self.refuse.lock().unwrap().clear();
    }

    fn check(&self, keys: impl Iterator<Item = String>) -> Result<()> {
        let refuse = self.refuse.lock().unwrap();
        for file_id in keys {
            if refuse.contains(&file_id) {
                return Err(Error::IndexWriteFailed(format!("refused write for {}", file_id)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for RecordingVectorStore {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.replace(entries, &[]).await
    }

    async fn delete(&self, keys: &[IndexKey]) -> Result<()> {
        self.replace(Vec::new(), keys).await
    }

    async fn replace(&self, entries: Vec<IndexEntry>, stale: &[IndexKey]) -> Result<()> {
        self.check(
            entries
                .iter()
                .map(|e| e.key.file_id.clone())
                .chain(stale.iter().map(|k| k.file_id.clone())),
        )?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.replace(entries, stale).await
    }

    async fn keys_for_file(&self, connector_id: &str, file_id: &str) -> Result<Vec<IndexKey>> {
        self.inner.keys_for_file(connector_id, file_id).await
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<(IndexEntry, f32)>> {
        self.inner.query(vector, limit).await
    }
}

/// Orchestrator serving Google Drive connectors from `store`, indexing into `db`.
pub fn scripted_orchestrator(db: &Database, store: Arc<ScriptedStore>) -> Orchestrator {
    Orchestrator::new(
        db.clone(),
        ContentStores::empty().register(ProviderKind::GoogleDrive, store),
        DocumentProcessor::new(ChunkConfig {
            chunk_size: 40,
            chunk_overlap: 8,
        }),
        EmbeddingGate::new(Arc::new(HashEmbedder::new(4)), GateConfig::default()),
        IndexWriter::new(Arc::new(db.clone())),
        RunSettings::default(),
    )
}
