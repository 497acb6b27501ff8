//! Per-connector sync leases shared by every process using the database.

use crate::database::Database;
use crate::error::DbResult;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::time::Duration;
use tracing::debug;

/// Who currently holds a connector's sync lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLease {
    pub connector_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

const LEASE_COLUMNS: &str = "connector_id, holder, acquired_at, expires_at";

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn row_to_lease(row: &Row) -> rusqlite::Result<SyncLease> {
    Ok(SyncLease {
        connector_id: row.get(0)?,
        holder: row.get(1)?,
        acquired_at: from_millis(row.get(2)?),
        expires_at: from_millis(row.get(3)?),
    })
}

impl Database {
    /// Claim or renew the sync lease of a connector for `holder`.
    ///
    /// The claim wins when the lease is free, already held by `holder`, or
    /// expired. Returns `None` on a win and the live lease of the other
    /// holder otherwise.
    pub fn claim_sync_lease(
        &self,
        connector_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DbResult<Option<SyncLease>> {
        let mut conn = self.conn()?;
        let now_ms = now.timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_ms = now_ms.saturating_add(ttl_ms);

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = tx.execute(
            r#"
            INSERT INTO sync_leases (connector_id, holder, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (connector_id) DO UPDATE
            SET acquired_at = CASE WHEN sync_leases.holder = excluded.holder
                                   THEN sync_leases.acquired_at ELSE excluded.acquired_at END,
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE sync_leases.holder = excluded.holder OR sync_leases.expires_at <= ?3
            "#,
            params![connector_id, holder, now_ms, expires_ms],
        )?;
        let other = if rows > 0 {
            None
        } else {
            tx.query_row(
                &format!("SELECT {} FROM sync_leases WHERE connector_id = ?1", LEASE_COLUMNS),
                params![connector_id],
                row_to_lease,
            )
            .optional()?
        };
        tx.commit()?;

        debug!(connector = connector_id, holder, claimed = other.is_none(), "Sync lease claim");
        Ok(other)
    }

    /// Give up a lease. A lease held by someone else is left alone.
    pub fn release_sync_lease(&self, connector_id: &str, holder: &str) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM sync_leases WHERE connector_id = ?1 AND holder = ?2",
            params![connector_id, holder],
        )?;
        Ok(())
    }

    /// The live lease of a connector, if any.
    pub fn sync_lease(&self, connector_id: &str, now: DateTime<Utc>) -> DbResult<Option<SyncLease>> {
        let conn = self.conn()?;
        let lease = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sync_leases WHERE connector_id = ?1 AND expires_at > ?2",
                    LEASE_COLUMNS
                ),
                params![connector_id, now.timestamp_millis()],
                row_to_lease,
            )
            .optional()?;
        Ok(lease)
    }
}
