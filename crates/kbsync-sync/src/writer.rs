//! Index Writer: supersede or remove one file's entries in the vector store.

use kbsync_core::{Error, IndexEntry, IndexKey, Result, VectorStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Writes a file's chunks so readers see either the old or the new version.
#[derive(Clone)]
pub struct IndexWriter {
    store: Arc<dyn VectorStore>,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Replace every entry of (connector, file) with `entries`.
    ///
    /// New keys are written and stale ones dropped in one store call. Stale
    /// keys are those recorded in `prior_keys` or found in the store, so
    /// entries left behind by an interrupted run are swept up too.
    pub async fn upsert_document(
        &self,
        connector_id: &str,
        file_id: &str,
        entries: Vec<IndexEntry>,
        prior_keys: &[IndexKey],
    ) -> Result<Vec<IndexKey>> {
        if let Some(foreign) = entries
            .iter()
            .find(|e| e.key.connector_id != connector_id || e.key.file_id != file_id)
        {
            return Err(Error::IndexWriteFailed(format!(
                "entry {} does not belong to {}/{}",
                foreign.key, connector_id, file_id
            )));
        }

        let new_keys: Vec<IndexKey> = entries.iter().map(|e| e.key.clone()).collect();
        let stale = self.stale_keys(connector_id, file_id, prior_keys, &new_keys).await?;

        debug!(
            connector = connector_id,
            file = file_id,
            written = new_keys.len(),
            superseded = stale.len(),
            "Writing document"
        );
        self.store
            .replace(entries, &stale)
            .await
            .map_err(into_write_failed)?;

        Ok(new_keys)
    }

    /// Remove every entry of (connector, file). Returns how many stored entries were dropped.
    pub async fn remove_document(&self, connector_id: &str, file_id: &str, known_keys: &[IndexKey]) -> Result<usize> {
        let stored = self.stored_keys(connector_id, file_id).await?;
        let removed = stored.len();
        let keys = merge_stale(connector_id, file_id, known_keys, stored, &[]);
        if keys.is_empty() {
            return Ok(0);
        }

        debug!(connector = connector_id, file = file_id, removed, "Removing document");
        self.store.delete(&keys).await.map_err(into_write_failed)?;
        Ok(removed)
    }

    async fn stored_keys(&self, connector_id: &str, file_id: &str) -> Result<Vec<IndexKey>> {
        self.store
            .keys_for_file(connector_id, file_id)
            .await
            .map_err(into_write_failed)
    }

    async fn stale_keys(
        &self,
        connector_id: &str,
        file_id: &str,
        prior_keys: &[IndexKey],
        keep: &[IndexKey],
    ) -> Result<Vec<IndexKey>> {
        let stored = self.stored_keys(connector_id, file_id).await?;
        Ok(merge_stale(connector_id, file_id, prior_keys, stored, keep))
    }
}

/// Recorded and stored keys of one file, minus those being kept.
fn merge_stale(
    connector_id: &str,
    file_id: &str,
    prior_keys: &[IndexKey],
    stored: Vec<IndexKey>,
    keep: &[IndexKey],
) -> Vec<IndexKey> {
    let keep: BTreeSet<&IndexKey> = keep.iter().collect();
    let stale: BTreeSet<IndexKey> = prior_keys
        .iter()
        .filter(|k| k.connector_id == connector_id && k.file_id == file_id)
        .cloned()
        .chain(stored)
        .filter(|k| !keep.contains(k))
        .collect();

    stale.into_iter().collect()
}

fn into_write_failed(err: Error) -> Error {
    match err {
        Error::IndexWriteFailed(_) => err,
        other => Error::IndexWriteFailed(other.to_string()),
    }
}
