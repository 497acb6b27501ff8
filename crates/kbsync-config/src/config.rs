//! Configuration structures and loading.

use crate::error::{ConfigError, ConfigResult};
use crate::paths::AppPaths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    /// Declarative connectors, upserted by name at startup.
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> ConfigResult<Self> {
        let paths = AppPaths::new().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&paths.config_file)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> ConfigResult<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> ConfigResult<()> {
        let paths = AppPaths::new().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&paths.config_file)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Create a default config file with comments.
    pub fn create_default_file(path: &PathBuf) -> ConfigResult<()> {
        let default_config = Self::default_config_string();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, default_config)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let p = &self.processing;
        if p.chunk_size == 0 {
            return Err(ConfigError::Invalid("processing.chunk_size must be > 0".into()));
        }
        if p.chunk_overlap >= p.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "processing.chunk_overlap ({}) must be smaller than chunk_size ({})",
                p.chunk_overlap, p.chunk_size
            )));
        }

        let s = &self.sync;
        if s.embed_batch_size == 0 {
            return Err(ConfigError::Invalid("sync.embed_batch_size must be > 0".into()));
        }
        if s.max_concurrent_files == 0 || s.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "sync.max_concurrent_files and sync.max_concurrent_runs must be > 0".into(),
            ));
        }
        if s.retry_initial_ms > s.retry_max_ms {
            return Err(ConfigError::Invalid(
                "sync.retry_initial_ms must not exceed sync.retry_max_ms".into(),
            ));
        }
        if s.lease_seconds < 3 {
            return Err(ConfigError::Invalid("sync.lease_seconds must be at least 3".into()));
        }
        if s.file_timeout_seconds == 0 || s.scheduler_tick_seconds == 0 {
            return Err(ConfigError::Invalid(
                "sync.file_timeout_seconds and sync.scheduler_tick_seconds must be > 0".into(),
            ));
        }

        for connector in &self.connectors {
            if connector.name.trim().is_empty() {
                return Err(ConfigError::Invalid("connector name must not be empty".into()));
            }
            if connector.folders.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "connector '{}' has no folders",
                    connector.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config file with helpful comments.
    pub fn default_config_string() -> String {
        r#"# kbsync Configuration
# Keeps a local knowledge base in step with your folders and cloud drives

[general]
# Data directory for database and cache
# data_dir = "~/.local/share/kbsync"

[ollama]
# Ollama server address
host = "http://localhost:11434"

# Model for generating embeddings
embedding_model = "nomic-embed-text"

# Request timeout in seconds
timeout_seconds = 120

# Expected vector size; inferred from the first response when unset
# dimensions = 768

[processing]
# Chunk windows, in characters
chunk_size = 1000
chunk_overlap = 200

# Files above this size are skipped unless a connector overrides it
max_file_size_mb = 10

[sync]
# Texts per embedding request
embed_batch_size = 16

# Retries for transient embedding failures (exponential backoff)
embed_max_retries = 4
retry_initial_ms = 500
retry_max_ms = 8000

# A single file taking longer than this fails for the run
file_timeout_seconds = 300

# Files processed in parallel within one run
max_concurrent_files = 4

# Connector runs executing at the same time
max_concurrent_runs = 2

# Cadence for connectors that do not set their own
default_interval_minutes = 15

# How often the scheduler looks for due connectors
scheduler_tick_seconds = 30

# A run holds a lease on its connector so two kbsync processes never sync
# it at once; a crashed process's lease expires after this long
lease_seconds = 120

[watch]
# Seconds to wait for file events to settle before triggering a sync
debounce_seconds = 2

# File patterns that never trigger a sync
ignore_patterns = [
    "*.tmp",
    "*.temp",
    ".DS_Store",
    "._*",
    "*.part",
]

# Connectors declared here are created or updated by name on startup.
# [[connectors]]
# name = "notes"
# provider = "local_folder"
# folders = ["~/Documents/Notes"]
# extensions = [".md", ".txt", ".pdf"]
#
# [[connectors]]
# name = "team-drive"
# provider = "google_drive"
# folders = ["<folder id>"]
# credential = "KBSYNC_GDRIVE_TOKEN"
# interval_minutes = 30
"#
        .to_string()
    }

    /// Add or replace a declarative connector by name.
    pub fn upsert_connector(&mut self, connector: ConnectorConfig) {
        match self.connectors.iter_mut().find(|c| c.name == connector.name) {
            Some(existing) => *existing = connector,
            None => self.connectors.push(connector),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub data_dir: Option<String>,
}

/// Ollama embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub embedding_model: String,
    pub timeout_seconds: u64,
    pub dimensions: Option<usize>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            timeout_seconds: 120,
            dimensions: None,
        }
    }
}

/// Document processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_file_size_mb: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_file_size_mb: 10,
        }
    }
}

/// Sync run tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub embed_batch_size: usize,
    pub embed_max_retries: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub file_timeout_seconds: u64,
    pub max_concurrent_files: usize,
    pub max_concurrent_runs: usize,
    pub default_interval_minutes: u32,
    pub scheduler_tick_seconds: u64,
    /// Lifetime of a connector's cross-process sync lease between renewals.
    pub lease_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: 16,
            embed_max_retries: 4,
            retry_initial_ms: 500,
            retry_max_ms: 8000,
            file_timeout_seconds: 300,
            max_concurrent_files: 4,
            max_concurrent_runs: 2,
            default_interval_minutes: 15,
            scheduler_tick_seconds: 30,
            lease_seconds: 120,
        }
    }
}

/// Local folder watching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_seconds: u64,
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_seconds: 2,
            ignore_patterns: vec![
                "*.tmp".to_string(),
                "*.temp".to_string(),
                ".DS_Store".to_string(),
                "._*".to_string(),
                "*.part".to_string(),
            ],
        }
    }
}

/// A connector declared in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,
    /// `local_folder`, `google_drive` or `onedrive`.
    pub provider: String,
    pub folders: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
    /// Name of the credential, e.g. an environment variable holding a token.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub interval_minutes: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
