//! Sync State Store: per-file records of what has been indexed.
//!
//! Every write is a single-statement compare-and-set on the row `version`,
//! so overlapping writers for one (connector, file) cannot lose updates.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::operations::connectors::parse_timestamp;
use chrono::Utc;
use kbsync_core::{FileSyncState, IndexKey, ModificationSignature};
use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

const STATE_COLUMNS: &str =
    "connector_id, file_id, path, modified_at, content_hash, processed, index_keys, version, updated_at";

fn row_to_state(row: &Row) -> rusqlite::Result<FileSyncState> {
    let connector_id: String = row.get(0)?;
    let file_id: String = row.get(1)?;
    let modified_at: Option<String> = row.get(3)?;
    let content_hash: Option<String> = row.get(4)?;
    let mut processed: bool = row.get(5)?;
    let keys_json: String = row.get(6)?;
    let updated_at: String = row.get(8)?;

    // An unreadable key list cannot vouch for the index; force a reprocess.
    let index_keys = match decode_keys(&keys_json) {
        Some(keys) => keys,
        None => {
            warn!(connector = %connector_id, file = %file_id, "Corrupt index key list");
            processed = false;
            Vec::new()
        }
    };

    Ok(FileSyncState {
        connector_id,
        file_id,
        path: row.get(2)?,
        signature: ModificationSignature::new(
            modified_at.as_deref().and_then(parse_timestamp),
            content_hash,
        ),
        processed,
        index_keys,
        version: row.get(7)?,
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
    })
}

fn encode_keys(keys: &[IndexKey]) -> DbResult<String> {
    let strings: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    Ok(serde_json::to_string(&strings)?)
}

fn decode_keys(json: &str) -> Option<Vec<IndexKey>> {
    let strings: Vec<String> = serde_json::from_str(json).ok()?;
    strings.iter().map(|s| IndexKey::parse(s)).collect()
}

impl Database {
    /// All stored states for a connector, ordered by file ID.
    pub fn list_file_states(&self, connector_id: &str) -> DbResult<Vec<FileSyncState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_sync_state WHERE connector_id = ?1 ORDER BY file_id",
            STATE_COLUMNS
        ))?;
        let states = stmt
            .query_map(params![connector_id], row_to_state)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(states)
    }

    /// The stored state for one file, if any.
    pub fn get_file_state(&self, connector_id: &str, file_id: &str) -> DbResult<Option<FileSyncState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                &format!(
                    "SELECT {} FROM file_sync_state WHERE connector_id = ?1 AND file_id = ?2",
                    STATE_COLUMNS
                ),
                params![connector_id, file_id],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    /// Write a file's state if the stored row is still at `state.version`.
    ///
    /// Version 0 means the caller expects no row yet. On success the stored
    /// state is returned with its new version; a lost race is `DbError::Conflict`.
    pub fn commit_file_state(&self, state: &FileSyncState) -> DbResult<FileSyncState> {
        let conn = self.conn()?;
        let now = Utc::now();
        let keys = encode_keys(&state.index_keys)?;
        let modified_at = state.signature.modified_at.map(|dt| dt.to_rfc3339());

        let rows = if state.version == 0 {
            conn.execute(
                r#"
                INSERT INTO file_sync_state (connector_id, file_id, path, modified_at, content_hash, processed, index_keys, version, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)
                ON CONFLICT (connector_id, file_id) DO NOTHING
                "#,
                params![
                    state.connector_id,
                    state.file_id,
                    state.path,
                    modified_at,
                    state.signature.content_hash,
                    state.processed,
                    keys,
                    now.to_rfc3339(),
                ],
            )?
        } else {
            conn.execute(
                r#"
                UPDATE file_sync_state
                SET path = ?3, modified_at = ?4, content_hash = ?5, processed = ?6,
                    index_keys = ?7, version = version + 1, updated_at = ?8
                WHERE connector_id = ?1 AND file_id = ?2 AND version = ?9
                "#,
                params![
                    state.connector_id,
                    state.file_id,
                    state.path,
                    modified_at,
                    state.signature.content_hash,
                    state.processed,
                    keys,
                    now.to_rfc3339(),
                    state.version,
                ],
            )?
        };

        if rows == 0 {
            return Err(DbError::Conflict(format!(
                "{}/{} is no longer at version {}",
                state.connector_id, state.file_id, state.version
            )));
        }

        Ok(FileSyncState {
            version: state.version + 1,
            updated_at: now,
            ..state.clone()
        })
    }

    /// Remove a file's state if it is still at `expected_version`.
    ///
    /// Removing a row that is already gone succeeds.
    pub fn delete_file_state(&self, connector_id: &str, file_id: &str, expected_version: i64) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM file_sync_state WHERE connector_id = ?1 AND file_id = ?2 AND version = ?3",
            params![connector_id, file_id, expected_version],
        )?;

        if rows == 0 {
            let still_there: Option<i64> = conn
                .query_row(
                    "SELECT version FROM file_sync_state WHERE connector_id = ?1 AND file_id = ?2",
                    params![connector_id, file_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(version) = still_there {
                return Err(DbError::Conflict(format!(
                    "{}/{} is at version {}, expected {}",
                    connector_id, file_id, version, expected_version
                )));
            }
        }

        Ok(())
    }
}
