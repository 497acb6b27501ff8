//! Append-only sync run log.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::operations::connectors::parse_timestamp;
use chrono::Utc;
use kbsync_core::{ErrorKind, FileError, RunStatus, SyncRun};
use rusqlite::{params, Connection, Row};
use tracing::debug;

const RUN_COLUMNS: &str = "id, connector_id, started_at, completed_at, status, files_processed, files_deleted, files_unchanged, cancelled";

fn row_to_run(row: &Row) -> rusqlite::Result<SyncRun> {
    let started_at: String = row.get(2)?;
    let completed_at: String = row.get(3)?;
    let status: String = row.get(4)?;

    Ok(SyncRun {
        id: row.get(0)?,
        connector_id: row.get(1)?,
        started_at: parse_timestamp(&started_at).unwrap_or_else(Utc::now),
        completed_at: parse_timestamp(&completed_at).unwrap_or_else(Utc::now),
        status: RunStatus::from_str(&status).unwrap_or(RunStatus::Failed),
        files_processed: row.get(5)?,
        files_deleted: row.get(6)?,
        files_unchanged: row.get(7)?,
        errors: Vec::new(),
        cancelled: row.get(8)?,
    })
}

fn load_errors(conn: &Connection, run_id: &str) -> DbResult<Vec<FileError>> {
    let mut stmt = conn.prepare(
        "SELECT file_id, kind, message FROM sync_run_errors WHERE run_id = ?1 ORDER BY position",
    )?;
    let errors = stmt
        .query_map(params![run_id], |row| {
            let kind: String = row.get(1)?;
            Ok(FileError {
                file_id: row.get(0)?,
                kind: ErrorKind::from_str(&kind).unwrap_or(ErrorKind::Storage),
                message: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(errors)
}

impl Database {
    /// Append a completed run and its error list.
    ///
    /// Runs are never updated; appending the same ID twice fails.
    pub fn append_run(&self, run: &SyncRun) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO sync_runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                RUN_COLUMNS
            ),
            params![
                run.id,
                run.connector_id,
                run.started_at.to_rfc3339(),
                run.completed_at.to_rfc3339(),
                run.status.as_str(),
                run.files_processed,
                run.files_deleted,
                run.files_unchanged,
                run.cancelled,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO sync_run_errors (run_id, position, file_id, kind, message) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, error) in run.errors.iter().enumerate() {
                stmt.execute(params![
                    run.id,
                    position as i64,
                    error.file_id,
                    error.kind.as_str(),
                    error.message,
                ])?;
            }
        }

        tx.commit()?;
        debug!(run = %run.id, status = %run.status, errors = run.errors.len(), "Recorded sync run");
        Ok(())
    }

    /// Get a run with its errors.
    pub fn get_run(&self, id: &str) -> DbResult<SyncRun> {
        let conn = self.conn()?;
        let mut run = conn
            .query_row(
                &format!("SELECT {} FROM sync_runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                row_to_run,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DbError::NotFound(format!("Sync run not found: {}", id))
                }
                _ => DbError::from(e),
            })?;
        run.errors = load_errors(&conn, &run.id)?;
        Ok(run)
    }

    /// Most recent runs first, optionally for one connector.
    pub fn list_runs(&self, connector_id: Option<&str>, limit: i64) -> DbResult<Vec<SyncRun>> {
        let conn = self.conn()?;

        let mut runs = match connector_id {
            Some(id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sync_runs WHERE connector_id = ?1 ORDER BY started_at DESC LIMIT ?2",
                    RUN_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![id, limit], row_to_run)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sync_runs ORDER BY started_at DESC LIMIT ?1",
                    RUN_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![limit], row_to_run)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        for run in &mut runs {
            run.errors = load_errors(&conn, &run.id)?;
        }

        Ok(runs)
    }
}
