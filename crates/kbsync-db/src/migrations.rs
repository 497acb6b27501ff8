//! Database migrations and schema management.

use crate::error::DbResult;
use rusqlite::Connection;
use tracing::info;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> DbResult<()> {
    let mut current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating initial database schema...");
        create_initial_schema(conn)?;
        set_schema_version(conn, 1)?;
        current_version = 1;
    }

    if current_version < SCHEMA_VERSION {
        info!(
            "Migrating database from version {} to {}",
            current_version, SCHEMA_VERSION
        );
        run_migrations(conn, current_version)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> DbResult<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn create_initial_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        r#"
        -- Configured sources
        CREATE TABLE IF NOT EXISTS connectors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            credential_ref TEXT,
            scope TEXT NOT NULL DEFAULT '{}',
            sync_interval_minutes INTEGER NOT NULL DEFAULT 15,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            last_sync TEXT
        );

        -- What has been indexed per (connector, file)
        CREATE TABLE IF NOT EXISTS file_sync_state (
            connector_id TEXT NOT NULL REFERENCES connectors(id) ON DELETE CASCADE,
            file_id TEXT NOT NULL,
            path TEXT NOT NULL,
            modified_at TEXT,
            content_hash TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            index_keys TEXT NOT NULL DEFAULT '[]',
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (connector_id, file_id)
        );

        -- Vector store (vectors stored as little-endian f32 BLOB)
        CREATE TABLE IF NOT EXISTS index_entries (
            index_key TEXT PRIMARY KEY,
            connector_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            path TEXT NOT NULL,
            format TEXT,
            content TEXT NOT NULL,
            vector BLOB NOT NULL,
            dimensions INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_index_entries_file ON index_entries(connector_id, file_id);

        -- Append-only run log; survives connector removal
        CREATE TABLE IF NOT EXISTS sync_runs (
            id TEXT PRIMARY KEY,
            connector_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            status TEXT NOT NULL,
            files_processed INTEGER NOT NULL DEFAULT 0,
            files_deleted INTEGER NOT NULL DEFAULT 0,
            files_unchanged INTEGER NOT NULL DEFAULT 0,
            cancelled INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_sync_runs_connector ON sync_runs(connector_id, started_at);

        CREATE TABLE IF NOT EXISTS sync_run_errors (
            run_id TEXT NOT NULL REFERENCES sync_runs(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            file_id TEXT,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            PRIMARY KEY (run_id, position)
        );

        -- Enable foreign keys
        PRAGMA foreign_keys = ON;
        "#,
    )?;

    Ok(())
}

fn run_migrations(conn: &Connection, from_version: i32) -> DbResult<()> {
    if from_version < 2 {
        conn.execute_batch(
            r#"
            -- One sync run per connector across processes sharing this file
            CREATE TABLE IF NOT EXISTS sync_leases (
                connector_id TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_versioned() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Re-running is a no-op
        initialize_schema(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_version_one_database_gains_leases() {
        let conn = Connection::open_in_memory().unwrap();
        create_initial_schema(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let leases: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_leases", [], |row| row.get(0))
            .unwrap();
        assert_eq!(leases, 0);
    }
}
