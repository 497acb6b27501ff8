//! SQLite-backed vector store.
//!
//! Search is brute-force cosine similarity, which is fine for personal
//! knowledge bases (<100K chunks).

use crate::database::Database;
use crate::error::DbResult;
use async_trait::async_trait;
use kbsync_core::{DocumentFormat, Error, IndexEntry, IndexKey, VectorStore};
use rusqlite::{params, Row};
use std::collections::HashSet;
use tracing::debug;

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot_product += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    dot_product / denominator
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8], dimensions: usize) -> Vec<f32> {
    bytes
        .chunks(4)
        .take(dimensions)
        .map(|b| {
            if b.len() == 4 {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]])
            } else {
                0.0
            }
        })
        .collect()
}

const ENTRY_COLUMNS: &str = "connector_id, file_id, ordinal, path, format, content, vector, dimensions";

fn row_to_entry(row: &Row) -> rusqlite::Result<IndexEntry> {
    let format: Option<String> = row.get(4)?;
    let vector_bytes: Vec<u8> = row.get(6)?;
    let dimensions: i64 = row.get(7)?;

    Ok(IndexEntry {
        key: IndexKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get(2)?),
        path: row.get(3)?,
        format: format.as_deref().and_then(DocumentFormat::from_extension),
        text: row.get(5)?,
        vector: bytes_to_vector(&vector_bytes, dimensions as usize),
    })
}

impl Database {
    /// Upsert `entries` and delete `stale` keys in a single transaction.
    ///
    /// Readers see either the previous entry set or the new one, never a mix.
    /// Stale keys that are also being written are kept.
    pub fn replace_entries(&self, entries: &[IndexEntry], stale: &[IndexKey]) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO index_entries (index_key, connector_id, file_id, ordinal, path, format, content, vector, dimensions)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT (index_key) DO UPDATE SET
                    path = excluded.path,
                    format = excluded.format,
                    content = excluded.content,
                    vector = excluded.vector,
                    dimensions = excluded.dimensions
                "#,
            )?;
            for entry in entries {
                upsert.execute(params![
                    entry.key.to_string(),
                    entry.key.connector_id,
                    entry.key.file_id,
                    entry.key.ordinal,
                    entry.path,
                    entry.format.map(|f| f.as_str()),
                    entry.text,
                    vector_to_bytes(&entry.vector),
                    entry.vector.len() as i64,
                ])?;
            }

            let written: HashSet<&IndexKey> = entries.iter().map(|e| &e.key).collect();
            let mut delete = tx.prepare("DELETE FROM index_entries WHERE index_key = ?1")?;
            for key in stale.iter().filter(|k| !written.contains(k)) {
                delete.execute(params![key.to_string()])?;
            }
        }

        tx.commit()?;
        debug!(written = entries.len(), stale = stale.len(), "Replaced index entries");
        Ok(())
    }

    /// Delete entries by key.
    pub fn delete_entries(&self, keys: &[IndexKey]) -> DbResult<()> {
        self.replace_entries(&[], keys)
    }

    /// Keys stored for one file, ordered by ordinal.
    pub fn index_keys_for_file(&self, connector_id: &str, file_id: &str) -> DbResult<Vec<IndexKey>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ordinal FROM index_entries WHERE connector_id = ?1 AND file_id = ?2 ORDER BY ordinal",
        )?;
        let keys = stmt
            .query_map(params![connector_id, file_id], |row| {
                Ok(IndexKey::new(connector_id, file_id, row.get(0)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Entries stored for one file, ordered by ordinal.
    pub fn entries_for_file(&self, connector_id: &str, file_id: &str) -> DbResult<Vec<IndexEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM index_entries WHERE connector_id = ?1 AND file_id = ?2 ORDER BY ordinal",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![connector_id, file_id], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Number of stored entries, optionally for one connector.
    pub fn count_index_entries(&self, connector_id: Option<&str>) -> DbResult<i64> {
        let conn = self.conn()?;
        let count = match connector_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM index_entries WHERE connector_id = ?1",
                params![id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM index_entries", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// Find the entries most similar to `query_vector`, best first.
    pub fn vector_search(&self, query_vector: &[f32], limit: usize) -> DbResult<Vec<(IndexEntry, f32)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM index_entries", ENTRY_COLUMNS))?;

        let mut results: Vec<(IndexEntry, f32)> = stmt
            .query_map([], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| {
                let score = cosine_similarity(query_vector, &entry.vector);
                (entry, score)
            })
            .collect();

        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        results.truncate(limit);
        Ok(results)
    }
}

fn write_failed(err: crate::error::DbError) -> Error {
    Error::IndexWriteFailed(err.to_string())
}

#[async_trait]
impl VectorStore for Database {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> kbsync_core::Result<()> {
        self.blocking(move |db| db.replace_entries(&entries, &[]))
            .await
            .map_err(write_failed)
    }

    async fn delete(&self, keys: &[IndexKey]) -> kbsync_core::Result<()> {
        let keys = keys.to_vec();
        self.blocking(move |db| db.delete_entries(&keys))
            .await
            .map_err(write_failed)
    }

    async fn replace(&self, entries: Vec<IndexEntry>, stale: &[IndexKey]) -> kbsync_core::Result<()> {
        let stale = stale.to_vec();
        self.blocking(move |db| db.replace_entries(&entries, &stale))
            .await
            .map_err(write_failed)
    }

    async fn keys_for_file(&self, connector_id: &str, file_id: &str) -> kbsync_core::Result<Vec<IndexKey>> {
        let (connector_id, file_id) = (connector_id.to_string(), file_id.to_string());
        Ok(self
            .blocking(move |db| db.index_keys_for_file(&connector_id, &file_id))
            .await?)
    }

    async fn query(&self, vector: &[f32], limit: usize) -> kbsync_core::Result<Vec<(IndexEntry, f32)>> {
        let vector = vector.to_vec();
        Ok(self.blocking(move |db| db.vector_search(&vector, limit)).await?)
    }
}
