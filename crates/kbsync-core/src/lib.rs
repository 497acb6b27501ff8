//! kbsync Core - Domain types and capability traits for the connector sync pipeline.

mod capabilities;
mod error;
mod types;

pub use capabilities::{BackendError, ContentStore, EmbeddingBackend, VectorStore};
pub use error::{Error, ErrorKind, Result};
pub use types::*;
