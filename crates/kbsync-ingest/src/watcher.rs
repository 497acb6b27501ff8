//! File system watcher that turns local edits into sync triggers.

use crate::error::{IngestError, IngestResult};
use crate::sources::LocalFolderStore;
use glob::Pattern;
use kbsync_core::{Connector, ConnectorId, ProviderKind};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Patterns to ignore.
    pub ignore_patterns: Vec<Pattern>,
    /// Debounce duration.
    pub debounce: Duration,
}

impl WatcherConfig {
    /// Create from config.
    pub fn from_config(config: &kbsync_config::WatchConfig) -> Self {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid watch pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            ignore_patterns,
            debounce: Duration::from_secs(config.debounce_seconds.max(1)),
        }
    }
}

/// Watches local-folder connectors and reports which ones saw changes.
pub struct FolderWatcher {
    config: WatcherConfig,
    debouncer: Debouncer<RecommendedWatcher>,
    receiver: Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    roots: Vec<(PathBuf, ConnectorId)>,
}

impl FolderWatcher {
    /// Create a new watcher with no folders registered.
    pub fn new(config: WatcherConfig) -> IngestResult<Self> {
        let (tx, rx) = channel();

        let debouncer = new_debouncer(config.debounce, tx)
            .map_err(|e| IngestError::WatchError(e.to_string()))?;

        Ok(Self {
            config,
            debouncer,
            receiver: rx,
            roots: Vec::new(),
        })
    }

    /// Start watching a connector's folders. Non-local connectors are skipped.
    pub fn watch_connector(&mut self, connector: &Connector) -> IngestResult<()> {
        if connector.provider != ProviderKind::LocalFolder {
            return Ok(());
        }

        for dir in LocalFolderStore::roots(connector) {
            if !dir.is_dir() {
                warn!("Watch directory does not exist: {:?}", dir);
                continue;
            }

            info!(connector = %connector.name, "Watching directory: {:?}", dir);
            self.debouncer
                .watcher()
                .watch(&dir, RecursiveMode::Recursive)
                .map_err(|e| IngestError::WatchError(e.to_string()))?;
            self.roots.push((dir, connector.id.clone()));
        }

        Ok(())
    }

    /// Number of watched folders.
    pub fn watched_folders(&self) -> usize {
        self.roots.len()
    }

    /// Connectors with pending changes (non-blocking).
    pub fn poll(&self) -> Vec<ConnectorId> {
        let mut changed = BTreeSet::new();

        while let Ok(result) = self.receiver.try_recv() {
            match result {
                Ok(events) => {
                    for event in events {
                        if let Some(id) = self.owner_of_event(&event) {
                            changed.insert(id.to_string());
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            }
        }

        changed.into_iter().collect()
    }

    fn owner_of_event(&self, event: &DebouncedEvent) -> Option<&str> {
        let path = &event.path;

        if path.is_dir() {
            return None;
        }

        if should_ignore_path(path, &self.config.ignore_patterns) {
            debug!("Ignoring change: {:?}", path);
            return None;
        }

        owner_of(&self.roots, path)
    }
}

/// The connector owning a path, by longest matching root.
fn owner_of<'a>(roots: &'a [(PathBuf, ConnectorId)], path: &Path) -> Option<&'a str> {
    roots
        .iter()
        .filter(|(root, _)| path.starts_with(root))
        .max_by_key(|(root, _)| root.components().count())
        .map(|(_, id)| id.as_str())
}

fn should_ignore_path(path: &Path, patterns: &[Pattern]) -> bool {
    if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
        // Ignore hidden files
        if filename.starts_with('.') {
            return true;
        }

        if patterns.iter().any(|p| p.matches(filename)) {
            return true;
        }
    }

    let path_str = path.to_string_lossy();
    patterns.iter().any(|p| p.matches(&path_str))
}
