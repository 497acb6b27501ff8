//! Core domain types for kbsync.

use crate::error::{Error, ErrorKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for connectors.
pub type ConnectorId = String;

/// Identifier of a file, unique within its connector.
pub type FileId = String;

/// Unique identifier for sync runs.
pub type RunId = String;

/// Unique identifier for submitted sync jobs.
pub type JobId = String;

/// Generate a new unique ID.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of remote source a connector talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    LocalFolder,
    GoogleDrive,
    #[serde(rename = "onedrive")]
    OneDrive,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::LocalFolder => "local_folder",
            ProviderKind::GoogleDrive => "google_drive",
            ProviderKind::OneDrive => "onedrive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local_folder" | "local" => Some(ProviderKind::LocalFolder),
            "google_drive" | "gdrive" => Some(ProviderKind::GoogleDrive),
            "onedrive" => Some(ProviderKind::OneDrive),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Document formats the processor can extract text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Markdown,
    PlainText,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::PlainText => "text",
        }
    }

    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "md" | "markdown" | "mdown" | "mkd" => Some(DocumentFormat::Markdown),
            "txt" | "text" => Some(DocumentFormat::PlainText),
            _ => None,
        }
    }

    /// Detect format from a MIME type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(DocumentFormat::Pdf),
            "text/markdown" | "text/x-markdown" => Some(DocumentFormat::Markdown),
            "text/plain" => Some(DocumentFormat::PlainText),
            _ => None,
        }
    }

    /// Detect format from a file name, falling back to the MIME type.
    pub fn detect(name: &str, mime: Option<&str>) -> Option<Self> {
        name.rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext))
            .or_else(|| mime.and_then(Self::from_mime))
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which part of a source a connector syncs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileScope {
    /// Folder identifiers (local paths or remote folder ids).
    pub folders: Vec<String>,
    /// Extension filter such as `.pdf`; empty admits everything.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Files larger than this are excluded.
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

impl FileScope {
    pub fn new(folders: Vec<String>) -> Self {
        Self {
            folders,
            extensions: Vec::new(),
            max_size_mb: None,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_max_size_mb(mut self, max: u64) -> Self {
        self.max_size_mb = Some(max);
        self
    }

    /// Check if a listed file matches the configured filters.
    pub fn admits(&self, file: &RemoteFile) -> bool {
        if !self.extensions.is_empty() {
            let name = file.path.to_lowercase();
            let matched = self.extensions.iter().any(|ext| {
                let ext = ext.to_lowercase();
                if ext.starts_with('.') {
                    name.ends_with(&ext)
                } else {
                    name.ends_with(&format!(".{}", ext))
                }
            });
            if !matched {
                return false;
            }
        }

        if let Some(max_mb) = self.max_size_mb {
            if file.size > max_mb * 1024 * 1024 {
                return false;
            }
        }

        true
    }
}

/// A configured source of files to sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub name: String,
    pub provider: ProviderKind,
    /// Opaque reference resolved by an external credential store.
    pub credential_ref: Option<String>,
    pub scope: FileScope,
    pub sync_interval_minutes: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    /// Written only by the orchestrator when a run completes.
    pub last_sync: Option<DateTime<Utc>>,
}

impl Connector {
    pub fn new(name: impl Into<String>, provider: ProviderKind, scope: FileScope) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            provider,
            credential_ref: None,
            scope,
            sync_interval_minutes: 15,
            enabled: true,
            created_at: Utc::now(),
            last_sync: None,
        }
    }

    pub fn with_credential(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = Some(credential_ref.into());
        self
    }

    pub fn with_interval_minutes(mut self, minutes: u32) -> Self {
        self.sync_interval_minutes = minutes;
        self
    }

    /// Whether the scheduler should trigger a run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_sync {
            None => true,
            Some(last) => last + Duration::minutes(self.sync_interval_minutes as i64) <= now,
        }
    }
}

/// Timestamp and/or content hash used to detect whether a file changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationSignature {
    pub modified_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
}

impl ModificationSignature {
    pub fn new(modified_at: Option<DateTime<Utc>>, content_hash: Option<String>) -> Self {
        Self {
            modified_at,
            content_hash: content_hash.filter(|h| !h.is_empty()),
        }
    }

    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self::new(None, Some(hash.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.modified_at.is_none() && self.content_hash.is_none()
    }

    /// Whether `self` (freshly listed) describes the same version as `stored`.
    ///
    /// The hash is authoritative when the source supplies one; otherwise the
    /// timestamp is compared. Anything missing on either side counts as a change.
    pub fn matches(&self, stored: &ModificationSignature) -> bool {
        if let Some(ref hash) = self.content_hash {
            return stored.content_hash.as_deref() == Some(hash.as_str());
        }
        match (self.modified_at, stored.modified_at) {
            (Some(current), Some(previous)) => current == previous,
            _ => false,
        }
    }
}

/// A file as reported by one listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub file_id: FileId,
    pub path: String,
    pub signature: ModificationSignature,
    pub size: u64,
    pub mime_type: Option<String>,
}

impl RemoteFile {
    pub fn new(file_id: impl Into<String>, path: impl Into<String>, signature: ModificationSignature) -> Self {
        Self {
            file_id: file_id.into(),
            path: path.into(),
            signature,
            size: 0,
            mime_type: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Declared format of this file, if supported.
    pub fn format(&self) -> Option<DocumentFormat> {
        DocumentFormat::detect(&self.path, self.mime_type.as_deref())
    }
}

/// Stable identifier of one vector-store entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey {
    pub connector_id: ConnectorId,
    pub file_id: FileId,
    pub ordinal: u32,
}

impl IndexKey {
    const SEPARATOR: &'static str = "::";

    pub fn new(connector_id: impl Into<String>, file_id: impl Into<String>, ordinal: u32) -> Self {
        Self {
            connector_id: connector_id.into(),
            file_id: file_id.into(),
            ordinal,
        }
    }

    /// Parse the string form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let (connector_id, rest) = s.split_once(Self::SEPARATOR)?;
        let (file_id, ordinal) = rest.rsplit_once(Self::SEPARATOR)?;
        if connector_id.is_empty() || file_id.is_empty() {
            return None;
        }
        Some(Self::new(connector_id, file_id, ordinal.parse().ok()?))
    }

    /// Prefix shared by every key of one (connector, file) pair.
    pub fn file_prefix(connector_id: &str, file_id: &str) -> String {
        format!("{}{sep}{}{sep}", connector_id, file_id, sep = Self::SEPARATOR)
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            Self::file_prefix(&self.connector_id, &self.file_id),
            self.ordinal
        )
    }
}

/// A bounded span of extracted text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub key: IndexKey,
    pub text: String,
    /// Character offset of the chunk within the normalized document.
    pub start_offset: usize,
}

impl Chunk {
    pub fn ordinal(&self) -> u32 {
        self.key.ordinal
    }
}

/// One vector plus the metadata tying it back to its source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: IndexKey,
    pub vector: Vec<f32>,
    pub text: String,
    pub path: String,
    pub format: Option<DocumentFormat>,
}

/// Durable record of what has been indexed for one (connector, file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSyncState {
    pub connector_id: ConnectorId,
    pub file_id: FileId,
    pub path: String,
    pub signature: ModificationSignature,
    pub processed: bool,
    /// Keys that should exist in the vector store for this file version.
    pub index_keys: Vec<IndexKey>,
    /// Row version used for compare-and-set updates.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl FileSyncState {
    /// State for a file that has just been processed successfully.
    pub fn processed(connector_id: &str, file: &RemoteFile, index_keys: Vec<IndexKey>) -> Self {
        Self {
            connector_id: connector_id.to_string(),
            file_id: file.file_id.clone(),
            path: file.path.clone(),
            signature: file.signature.clone(),
            processed: true,
            index_keys,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Final outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    PartialSuccess,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::PartialSuccess => "partial_success",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            "partial_success" => Some(RunStatus::PartialSuccess),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failure recorded in a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    /// `None` for connector-level failures such as a failed listing.
    pub file_id: Option<FileId>,
    pub kind: ErrorKind,
    pub message: String,
}

impl FileError {
    pub fn for_file(file_id: impl Into<String>, err: &Error) -> Self {
        Self {
            file_id: Some(file_id.into()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn for_connector(err: &Error) -> Self {
        Self {
            file_id: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one file within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Processed { chunks: usize },
    Skipped,
    Deleted,
    Failed(FileError),
}

/// A sync run that is still executing.
#[derive(Debug, Clone)]
pub struct RunBuilder {
    id: RunId,
    connector_id: ConnectorId,
    started_at: DateTime<Utc>,
    files_processed: u32,
    files_deleted: u32,
    files_unchanged: u32,
    errors: Vec<FileError>,
    cancelled: bool,
}

impl RunBuilder {
    pub fn begin(connector_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            connector_id: connector_id.into(),
            started_at: Utc::now(),
            files_processed: 0,
            files_deleted: 0,
            files_unchanged: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Processed { .. } => self.files_processed += 1,
            FileOutcome::Skipped => self.files_unchanged += 1,
            FileOutcome::Deleted => self.files_deleted += 1,
            FileOutcome::Failed(err) => self.errors.push(err),
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Finish a run whose listing failed; nothing was evaluated.
    pub fn fail(mut self, err: FileError) -> SyncRun {
        self.errors.push(err);
        self.finish(RunStatus::Failed)
    }

    /// Finish a run that got past listing.
    pub fn complete(self) -> SyncRun {
        let status = if self.errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };
        self.finish(status)
    }

    fn finish(self, status: RunStatus) -> SyncRun {
        SyncRun {
            id: self.id,
            connector_id: self.connector_id,
            started_at: self.started_at,
            completed_at: Utc::now(),
            status,
            files_processed: self.files_processed,
            files_deleted: self.files_deleted,
            files_unchanged: self.files_unchanged,
            errors: self.errors,
            cancelled: self.cancelled,
        }
    }
}

/// A completed sync run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: RunId,
    pub connector_id: ConnectorId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub files_processed: u32,
    pub files_deleted: u32,
    pub files_unchanged: u32,
    pub errors: Vec<FileError>,
    pub cancelled: bool,
}

/// Where a sync run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Listing,
    Diffing,
    Processing { file_id: FileId },
    Recording,
    Completed(RunStatus),
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Listing => write!(f, "listing"),
            RunPhase::Diffing => write!(f, "diffing"),
            RunPhase::Processing { file_id } => write!(f, "processing {}", file_id),
            RunPhase::Recording => write!(f, "recording"),
            RunPhase::Completed(status) => write!(f, "completed ({})", status),
        }
    }
}

/// Status of a submitted sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate counts for the status command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub connectors: i64,
    pub enabled_connectors: i64,
    pub tracked_files: i64,
    pub processed_files: i64,
    pub index_entries: i64,
    pub runs: i64,
    pub failed_runs: i64,
    pub database_size_bytes: i64,
}
