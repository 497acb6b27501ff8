//! Change Detector: classify a fresh listing against stored sync state.

use kbsync_core::{FileSyncState, RemoteFile};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// A listed file that needs (re)processing, with the state it replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFile {
    pub file: RemoteFile,
    /// `None` for files never seen before.
    pub previous: Option<FileSyncState>,
}

/// Disjoint classification of one connector's files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub to_process: Vec<PendingFile>,
    pub to_delete: Vec<FileSyncState>,
    pub unchanged: Vec<RemoteFile>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_process.is_empty() && self.to_delete.is_empty()
    }
}

/// Whether a listed file needs (re)processing.
fn needs_processing(file: &RemoteFile, stored: Option<&FileSyncState>) -> bool {
    match stored {
        None => true,
        Some(state) if !state.processed => true,
        Some(state) => !file.signature.matches(&state.signature),
    }
}

/// Compare the current listing with stored states.
///
/// Output order is by file ID, so identical inputs give identical results.
/// When a listing repeats a file ID, the first occurrence wins.
pub fn detect_changes(listing: Vec<RemoteFile>, stored: Vec<FileSyncState>) -> ChangeSet {
    let mut current: BTreeMap<String, RemoteFile> = BTreeMap::new();
    for file in listing {
        if current.contains_key(&file.file_id) {
            warn!(file = %file.file_id, "Duplicate file in listing, keeping the first");
            continue;
        }
        current.insert(file.file_id.clone(), file);
    }

    let mut previous: HashMap<String, FileSyncState> = HashMap::with_capacity(stored.len());
    let mut to_delete = Vec::new();
    for state in stored {
        if current.contains_key(&state.file_id) {
            previous.insert(state.file_id.clone(), state);
        } else {
            to_delete.push(state);
        }
    }
    to_delete.sort_by(|a, b| a.file_id.cmp(&b.file_id));

    let mut changes = ChangeSet {
        to_delete,
        ..Default::default()
    };

    for (file_id, file) in current {
        let state = previous.remove(&file_id);
        if needs_processing(&file, state.as_ref()) {
            changes.to_process.push(PendingFile {
                file,
                previous: state,
            });
        } else {
            changes.unchanged.push(file);
        }
    }

    changes
}
