//! Connector CRUD operations.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use kbsync_core::{Connector, FileScope, ProviderKind};
use rusqlite::{params, Row};
use tracing::{debug, info};

const CONNECTOR_COLUMNS: &str = "id, name, provider, credential_ref, scope, sync_interval_minutes, enabled, created_at, last_sync";

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn row_to_connector(row: &Row) -> rusqlite::Result<Connector> {
    let provider_str: String = row.get(2)?;
    let scope_str: String = row.get(4)?;
    let created_at_str: String = row.get(7)?;
    let last_sync_str: Option<String> = row.get(8)?;

    let provider = ProviderKind::from_str(&provider_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown provider: {}", provider_str).into(),
        )
    })?;

    Ok(Connector {
        id: row.get(0)?,
        name: row.get(1)?,
        provider,
        credential_ref: row.get(3)?,
        scope: serde_json::from_str::<FileScope>(&scope_str).unwrap_or_default(),
        sync_interval_minutes: row.get(5)?,
        enabled: row.get(6)?,
        created_at: parse_timestamp(&created_at_str).unwrap_or_else(Utc::now),
        last_sync: last_sync_str.as_deref().and_then(parse_timestamp),
    })
}

impl Database {
    /// Create a new connector.
    pub fn create_connector(&self, connector: &Connector) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO connectors (id, name, provider, credential_ref, scope, sync_interval_minutes, enabled, created_at, last_sync)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                connector.id,
                connector.name,
                connector.provider.as_str(),
                connector.credential_ref,
                serde_json::to_string(&connector.scope)?,
                connector.sync_interval_minutes,
                connector.enabled,
                connector.created_at.to_rfc3339(),
                connector.last_sync.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        info!(connector = %connector.id, name = %connector.name, "Created connector");
        Ok(())
    }

    /// Get a connector by ID.
    pub fn get_connector(&self, id: &str) -> DbResult<Connector> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM connectors WHERE id = ?1", CONNECTOR_COLUMNS),
            params![id],
            row_to_connector,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound(format!("Connector not found: {}", id))
            }
            _ => DbError::from(e),
        })
    }

    /// Get a connector by its unique name.
    pub fn get_connector_by_name(&self, name: &str) -> DbResult<Connector> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM connectors WHERE name = ?1", CONNECTOR_COLUMNS),
            params![name],
            row_to_connector,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound(format!("Connector not found: {}", name))
            }
            _ => DbError::from(e),
        })
    }

    /// Resolve a connector by ID, falling back to its name.
    pub fn find_connector(&self, id_or_name: &str) -> DbResult<Connector> {
        match self.get_connector(id_or_name) {
            Err(DbError::NotFound(_)) => self.get_connector_by_name(id_or_name),
            other => other,
        }
    }

    /// List connectors, oldest first.
    pub fn list_connectors(&self, enabled_only: bool) -> DbResult<Vec<Connector>> {
        let conn = self.conn()?;
        let sql = if enabled_only {
            format!(
                "SELECT {} FROM connectors WHERE enabled = 1 ORDER BY created_at, name",
                CONNECTOR_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM connectors ORDER BY created_at, name",
                CONNECTOR_COLUMNS
            )
        };

        let mut stmt = conn.prepare(&sql)?;
        let connectors = stmt
            .query_map([], row_to_connector)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(connectors)
    }

    /// Update a connector's configuration. `last_sync` is left untouched.
    pub fn update_connector(&self, connector: &Connector) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r#"
            UPDATE connectors
            SET name = ?2, provider = ?3, credential_ref = ?4, scope = ?5,
                sync_interval_minutes = ?6, enabled = ?7
            WHERE id = ?1
            "#,
            params![
                connector.id,
                connector.name,
                connector.provider.as_str(),
                connector.credential_ref,
                serde_json::to_string(&connector.scope)?,
                connector.sync_interval_minutes,
                connector.enabled,
            ],
        )?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Connector not found: {}", connector.id)));
        }

        Ok(())
    }

    /// Create the connector, or update the existing one with the same name.
    ///
    /// Returns the stored connector, keeping the existing ID and sync history.
    pub fn upsert_connector_by_name(&self, connector: &Connector) -> DbResult<Connector> {
        match self.get_connector_by_name(&connector.name) {
            Ok(existing) => {
                let updated = Connector {
                    id: existing.id.clone(),
                    created_at: existing.created_at,
                    last_sync: existing.last_sync,
                    ..connector.clone()
                };
                self.update_connector(&updated)?;
                debug!(connector = %updated.id, "Updated connector from config");
                Ok(updated)
            }
            Err(DbError::NotFound(_)) => {
                self.create_connector(connector)?;
                Ok(connector.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Enable or disable a connector.
    pub fn set_connector_enabled(&self, id: &str, enabled: bool) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE connectors SET enabled = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Connector not found: {}", id)));
        }

        Ok(())
    }

    /// Record when a sync run for this connector completed.
    pub fn update_last_sync(&self, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE connectors SET last_sync = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Connector not found: {}", id)));
        }

        Ok(())
    }

    /// Delete a connector together with its sync state and index entries.
    pub fn delete_connector(&self, id: &str) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let entries = tx.execute(
            "DELETE FROM index_entries WHERE connector_id = ?1",
            params![id],
        )?;
        // file_sync_state rows go with the connector via ON DELETE CASCADE
        let rows = tx.execute("DELETE FROM connectors WHERE id = ?1", params![id])?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Connector not found: {}", id)));
        }

        tx.commit()?;
        info!(connector = %id, entries, "Deleted connector");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_core::{FileSyncState, IndexEntry, IndexKey, ModificationSignature, RemoteFile};

    fn test_connector(name: &str) -> Connector {
        Connector::new(
            name,
            ProviderKind::LocalFolder,
            FileScope::new(vec!["/tmp/docs".into()]).with_extensions(vec![".md".into()]),
        )
    }

    #[test]
    fn test_create_and_get_connector() {
        let db = Database::open_in_memory().unwrap();
        let connector = test_connector("notes").with_credential("TOKEN_VAR");
        db.create_connector(&connector).unwrap();

        let retrieved = db.get_connector(&connector.id).unwrap();
        assert_eq!(retrieved.name, "notes");
        assert_eq!(retrieved.provider, ProviderKind::LocalFolder);
        assert_eq!(retrieved.scope, connector.scope);
        assert_eq!(retrieved.credential_ref.as_deref(), Some("TOKEN_VAR"));
        assert!(retrieved.last_sync.is_none());

        let by_name = db.find_connector("notes").unwrap();
        assert_eq!(by_name.id, connector.id);
    }

    #[test]
    fn test_upsert_by_name_keeps_id() {
        let db = Database::open_in_memory().unwrap();
        let first = db.upsert_connector_by_name(&test_connector("notes")).unwrap();

        let changed = test_connector("notes").with_interval_minutes(60);
        let second = db.upsert_connector_by_name(&changed).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.get_connector(&first.id).unwrap().sync_interval_minutes, 60);
        assert_eq!(db.list_connectors(false).unwrap().len(), 1);
    }

    #[test]
    fn test_enable_disable_and_last_sync() {
        let db = Database::open_in_memory().unwrap();
        let connector = test_connector("notes");
        db.create_connector(&connector).unwrap();

        db.set_connector_enabled(&connector.id, false).unwrap();
        assert!(db.list_connectors(true).unwrap().is_empty());
        assert_eq!(db.list_connectors(false).unwrap().len(), 1);

        let now = Utc::now();
        db.update_last_sync(&connector.id, now).unwrap();
        let stored = db.get_connector(&connector.id).unwrap();
        assert_eq!(stored.last_sync.map(|t| t.timestamp()), Some(now.timestamp()));

        assert!(matches!(
            db.update_last_sync("missing", now),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_cascades() {
        let db = Database::open_in_memory().unwrap();
        let connector = test_connector("notes");
        let other = test_connector("other");
        db.create_connector(&connector).unwrap();
        db.create_connector(&other).unwrap();

        for c in [&connector, &other] {
            let file = RemoteFile::new("a.md", "a.md", ModificationSignature::from_hash("h1"));
            let key = IndexKey::new(&c.id, "a.md", 0);
            db.replace_entries(
                &[IndexEntry {
                    key: key.clone(),
                    vector: vec![1.0, 0.0],
                    text: "hello".into(),
                    path: "a.md".into(),
                    format: None,
                }],
                &[],
            )
            .unwrap();
            db.commit_file_state(&FileSyncState::processed(&c.id, &file, vec![key]))
                .unwrap();
        }

        db.delete_connector(&connector.id).unwrap();

        assert!(db.get_connector(&connector.id).is_err());
        assert!(db.list_file_states(&connector.id).unwrap().is_empty());
        assert!(db.index_keys_for_file(&connector.id, "a.md").unwrap().is_empty());

        // The other connector is untouched
        assert_eq!(db.list_file_states(&other.id).unwrap().len(), 1);
        assert_eq!(db.index_keys_for_file(&other.id, "a.md").unwrap().len(), 1);
    }
}
