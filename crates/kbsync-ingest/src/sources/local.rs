//! Content store over local folders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kbsync_core::{
    Connector, ContentStore, Error, FileScope, ModificationSignature, RemoteFile, Result,
};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Lists files under a connector's folders recursively.
///
/// File IDs are paths relative to the scope folder, using `/` separators.
/// With several folders, IDs are prefixed with the folder's index. Only
/// files admitted by the connector's scope are hashed and listed.
#[derive(Debug, Clone, Default)]
pub struct LocalFolderStore;

impl LocalFolderStore {
    pub fn new() -> Self {
        Self
    }

    /// Scope folders with `~` expanded.
    pub fn roots(connector: &Connector) -> Vec<PathBuf> {
        connector
            .scope
            .folders
            .iter()
            .map(|f| PathBuf::from(shellexpand::tilde(f).as_ref()))
            .collect()
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Whether a walk error must abort the listing.
///
/// Entries that vanished mid-walk and symlink loops are skipped. Anything
/// else could hide files that are still there.
fn walk_failure(root: &Path, err: &walkdir::Error) -> Option<Error> {
    if err.loop_ancestor().is_some() {
        warn!("Skipping symlink loop under {}: {}", root.display(), err);
        return None;
    }
    if err.io_error().map(|e| e.kind()) == Some(ErrorKind::NotFound) {
        debug!("Entry vanished during scan of {}: {}", root.display(), err);
        return None;
    }
    let at = err
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| root.display().to_string());
    Some(Error::SourceUnavailable(format!("cannot read {}: {}", at, err)))
}

/// Content signature of a listed file.
///
/// A file that cannot be hashed gets an empty signature so it is processed
/// again and its read failure reaches the run log.
fn signature_of(path: &Path, modified_at: Option<DateTime<Utc>>) -> ModificationSignature {
    match hash_file(path) {
        Ok(hash) => ModificationSignature::new(modified_at, Some(hash)),
        Err(e) => {
            warn!("Cannot hash {}: {}", path.display(), e);
            ModificationSignature::default()
        }
    }
}

fn scan(roots: &[PathBuf], scope: &FileScope) -> Result<Vec<RemoteFile>> {
    let multiple = roots.len() > 1;
    let mut files = Vec::new();

    for (index, root) in roots.iter().enumerate() {
        if !root.is_dir() {
            return Err(Error::SourceUnavailable(format!(
                "folder does not exist: {}",
                root.display()
            )));
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => match walk_failure(root, &e) {
                    Some(err) => return Err(err),
                    None => continue,
                },
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = match path.strip_prefix(root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            let file_id = if multiple {
                format!("{}:{}", index, relative)
            } else {
                relative
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => match walk_failure(root, &e) {
                    Some(err) => return Err(err),
                    None => continue,
                },
            };
            let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
            let mut file =
                RemoteFile::new(file_id, path.to_string_lossy(), ModificationSignature::default())
                    .with_size(metadata.len());

            // Out-of-scope files are never read
            if !scope.admits(&file) {
                continue;
            }
            file.signature = signature_of(path, modified_at);
            files.push(file);
        }
    }

    Ok(files)
}

#[async_trait]
impl ContentStore for LocalFolderStore {
    async fn list(&self, connector: &Connector) -> Result<Vec<RemoteFile>> {
        let roots = Self::roots(connector);
        let scope = connector.scope.clone();
        tokio::task::spawn_blocking(move || scan(&roots, &scope))
            .await
            .map_err(|e| Error::SourceUnavailable(format!("folder scan aborted: {}", e)))?
    }

    async fn read(&self, _connector: &Connector, file: &RemoteFile) -> Result<Vec<u8>> {
        match tokio::fs::read(&file.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(file.file_id.clone()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_core::{FileScope, ProviderKind};
    use tempfile::TempDir;

    fn connector_for(dirs: &[&Path]) -> Connector {
        Connector::new(
            "local",
            ProviderKind::LocalFolder,
            FileScope::new(dirs.iter().map(|d| d.to_string_lossy().to_string()).collect()),
        )
    }

    #[tokio::test]
    async fn test_list_and_read() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("sub/b.md"), "# beta").unwrap();
        std::fs::write(dir.path().join(".hidden"), "secret").unwrap();

        let store = LocalFolderStore::new();
        let connector = connector_for(&[dir.path()]);

        let mut files = store.list(&connector).await.unwrap();
        files.sort_by(|a, b| a.file_id.cmp(&b.file_id));

        let ids: Vec<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "sub/b.md"]);
        assert_eq!(files[0].size, 5);
        assert!(files[0].signature.content_hash.is_some());
        assert!(files[0].signature.modified_at.is_some());

        let bytes = store.read(&connector, &files[0]).await.unwrap();
        assert_eq!(bytes, b"alpha");
    }

    #[tokio::test]
    async fn test_content_change_changes_hash() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "v1").unwrap();

        let store = LocalFolderStore::new();
        let connector = connector_for(&[dir.path()]);
        let before = store.list(&connector).await.unwrap().remove(0);

        std::fs::write(dir.path().join("a.txt"), "v2").unwrap();
        let after = store.list(&connector).await.unwrap().remove(0);

        assert_ne!(before.signature.content_hash, after.signature.content_hash);
    }

    #[tokio::test]
    async fn test_multiple_folders_are_prefixed() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(first.path().join("same.txt"), "1").unwrap();
        std::fs::write(second.path().join("same.txt"), "2").unwrap();

        let connector = connector_for(&[first.path(), second.path()]);
        let mut ids: Vec<String> = LocalFolderStore::new()
            .list(&connector)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.file_id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["0:same.txt", "1:same.txt"]);
    }

    #[tokio::test]
    async fn test_missing_folder_is_source_unavailable() {
        let connector = connector_for(&[Path::new("/definitely/not/here")]);
        let err = LocalFolderStore::new().list(&connector).await.unwrap_err();
        assert!(err.is_connector_level());
    }

    #[tokio::test]
    async fn test_vanished_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        let store = LocalFolderStore::new();
        let connector = connector_for(&[dir.path()]);
        let file = store.list(&connector).await.unwrap().remove(0);

        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        let err = store.read(&connector, &file).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_out_of_scope_files_are_not_listed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# kept").unwrap();
        std::fs::write(dir.path().join("movie.mp4"), vec![0u8; 16]).unwrap();
        std::fs::write(dir.path().join("huge.md"), vec![b'x'; 2 * 1024 * 1024]).unwrap();

        let mut connector = connector_for(&[dir.path()]);
        connector.scope = connector
            .scope
            .with_extensions(vec![".md".to_string()])
            .with_max_size_mb(1);

        let files = LocalFolderStore::new().list(&connector).await.unwrap();

        let ids: Vec<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
        assert_eq!(ids, vec!["notes.md"]);
    }

    #[test]
    fn test_unhashable_file_is_listed_with_empty_signature() {
        let dir = TempDir::new().unwrap();
        let signature = signature_of(&dir.path().join("gone.txt"), Some(Utc::now()));
        assert!(signature.is_empty());

        std::fs::write(dir.path().join("here.txt"), "alpha").unwrap();
        let signature = signature_of(&dir.path().join("here.txt"), None);
        assert!(signature.content_hash.is_some());
    }

    #[test]
    fn test_unreadable_subtree_aborts_listing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        // Walking below a regular file fails with ENOTDIR, not NotFound
        let not_a_dir = dir.path().join("a.txt").join("inner");
        let err = WalkDir::new(&not_a_dir).into_iter().next().unwrap().unwrap_err();
        let failure = walk_failure(dir.path(), &err).unwrap();
        assert!(matches!(failure, Error::SourceUnavailable(_)));
        assert!(failure.is_connector_level());

        let vanished = dir.path().join("vanished");
        let err = WalkDir::new(&vanished).into_iter().next().unwrap().unwrap_err();
        assert!(walk_failure(dir.path(), &err).is_none());
    }
}
