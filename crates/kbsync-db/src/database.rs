//! Connection pool and the blocking bridge for async callers.

use crate::error::{DbError, DbResult};
use crate::migrations;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use tracing::info;

type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Main database handle. Clones share one pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open a database file, creating it and its schema when missing.
    ///
    /// Several processes may open the same file; writers wait on each other
    /// for up to the busy timeout instead of failing.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Other(e.to_string()))?;
        }

        info!("Opening database at: {}", path.display());

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            Ok(())
        });
        let pool = Pool::builder().max_size(8).build(manager)?;
        Self::with_schema(pool)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });
        // Every connection to :memory: is a separate database
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::with_schema(pool)
    }

    fn with_schema(pool: Pool<SqliteConnectionManager>) -> DbResult<Self> {
        {
            let conn = pool.get()?;
            migrations::initialize_schema(&conn)?;
        }
        Ok(Self { pool })
    }

    pub(crate) fn conn(&self) -> DbResult<PooledConn> {
        self.pool.get().map_err(DbError::from)
    }

    /// Run synchronous database work on the blocking thread pool.
    pub async fn blocking<T, F>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || work(&db))
            .await
            .map_err(|e| DbError::Other(format!("database task failed: {}", e)))?
    }

    /// Size of the open database in bytes.
    pub fn size_bytes(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
        Ok(page_count * page_size)
    }
}
