//! Capabilities the sync pipeline depends on but does not own.
//!
//! Remote sources, the embedding model and the vector store sit behind these
//! traits so runs can be exercised against in-memory fakes.

use crate::error::Result;
use crate::types::{Connector, IndexEntry, IndexKey, RemoteFile};
use async_trait::async_trait;

/// Lists and reads files from one kind of remote source.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Enumerate every file in the connector's scope, across all pages.
    ///
    /// Connectivity or credential problems surface as `Error::SourceUnavailable`.
    async fn list(&self, connector: &Connector) -> Result<Vec<RemoteFile>>;

    /// Fetch the raw bytes of one file.
    ///
    /// A file deleted since listing surfaces as `Error::NotFound`.
    async fn read(&self, connector: &Connector, file: &RemoteFile) -> Result<Vec<u8>>;
}

/// Failure reported by an embedding backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Transient: rate limits, connection resets, 5xx responses.
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    /// Permanent: the input or the model is rejected.
    #[error("embedding backend rejected input: {0}")]
    InvalidInput(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts. The result has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError>;

    /// Model identifier, recorded for diagnostics.
    fn model_name(&self) -> &str;
}

/// Keyed vector storage used by the index writer.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite entries by key.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Remove entries by key. Unknown keys are ignored.
    async fn delete(&self, keys: &[IndexKey]) -> Result<()>;

    /// Write `entries` and drop `stale` so readers never see a document
    /// with neither version. Stores that can do this atomically should
    /// override the default.
    async fn replace(&self, entries: Vec<IndexEntry>, stale: &[IndexKey]) -> Result<()> {
        self.upsert(entries).await?;
        self.delete(stale).await
    }

    /// Every key currently stored for one (connector, file).
    async fn keys_for_file(&self, connector_id: &str, file_id: &str) -> Result<Vec<IndexKey>>;

    /// Nearest entries to `vector`, best first.
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<(IndexEntry, f32)>>;
}
