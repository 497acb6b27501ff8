//! Database statistics operations.

use crate::database::Database;
use crate::error::DbResult;
use kbsync_core::SyncStats;

impl Database {
    /// Get aggregate counts across connectors, sync state, index and run log.
    pub fn get_stats(&self) -> DbResult<SyncStats> {
        let database_size_bytes = self.size_bytes()?;
        let conn = self.conn()?;

        let count = |sql: &str| -> DbResult<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

        Ok(SyncStats {
            connectors: count("SELECT COUNT(*) FROM connectors")?,
            enabled_connectors: count("SELECT COUNT(*) FROM connectors WHERE enabled = 1")?,
            tracked_files: count("SELECT COUNT(*) FROM file_sync_state")?,
            processed_files: count("SELECT COUNT(*) FROM file_sync_state WHERE processed = 1")?,
            index_entries: count("SELECT COUNT(*) FROM index_entries")?,
            runs: count("SELECT COUNT(*) FROM sync_runs")?,
            failed_runs: count("SELECT COUNT(*) FROM sync_runs WHERE status = 'failed'")?,
            database_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_core::{Connector, FileScope, ProviderKind, RunBuilder};

    #[test]
    fn test_get_stats() {
        let db = Database::open_in_memory().unwrap();

        let enabled = Connector::new("a", ProviderKind::LocalFolder, FileScope::default());
        let mut disabled = Connector::new("b", ProviderKind::OneDrive, FileScope::default());
        disabled.enabled = false;
        db.create_connector(&enabled).unwrap();
        db.create_connector(&disabled).unwrap();

        db.append_run(&RunBuilder::begin(&enabled.id).complete()).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.connectors, 2);
        assert_eq!(stats.enabled_connectors, 1);
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.failed_runs, 0);
        assert_eq!(stats.index_entries, 0);
        assert!(stats.database_size_bytes > 0);
    }
}
