//! kbsync DB - SQLite persistence for connectors, sync state, the run log and the vector store.

mod database;
mod error;
mod migrations;
mod operations;

pub use database::Database;
pub use error::{DbError, DbResult};
pub use operations::leases::SyncLease;
pub use operations::vectors::cosine_similarity;
