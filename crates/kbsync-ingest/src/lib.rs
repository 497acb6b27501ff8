//! kbsync Ingest - Content stores, change detection and document processing.
//!
//! This crate provides:
//! - Content stores for local folders, Google Drive and OneDrive
//! - Change detection against stored sync state
//! - Document parsing (markdown, text, PDF) and chunking
//! - File system watching for local connectors

mod change_detector;
mod chunker;
mod error;
mod parsers;
mod processor;
pub mod sources;
mod watcher;

pub use change_detector::{detect_changes, ChangeSet, PendingFile};
pub use chunker::{normalize_text, ChunkConfig, ChunkWindows};
pub use error::{IngestError, IngestResult};
pub use parsers::{parser_for, DocumentParser, ParsedDocument};
pub use processor::{DocumentProcessor, ProcessedDocument};
pub use sources::{
    ContentStores, CredentialStore, EnvCredentialStore, GoogleDriveStore, LocalFolderStore,
    OneDriveStore, StaticCredentialStore,
};
pub use watcher::{FolderWatcher, WatcherConfig};
