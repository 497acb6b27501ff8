//! Google Drive content store over the Drive v3 REST API.

use super::{bearer_token, check_download, check_listing, transport_error, CredentialStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kbsync_core::{Connector, ContentStore, Error, ModificationSignature, RemoteFile, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, modifiedTime, size, md5Checksum, mimeType)";
const PAGE_SIZE: &str = "100";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
/// Native Docs/Sheets/Slides have no downloadable bytes.
const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    modified_time: Option<DateTime<Utc>>,
    /// Drive encodes int64 fields as strings.
    size: Option<String>,
    md5_checksum: Option<String>,
    mime_type: Option<String>,
}

impl DriveFile {
    fn into_remote(self) -> RemoteFile {
        let size = self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0);
        let mut file = RemoteFile::new(
            self.id,
            self.name,
            ModificationSignature::new(self.modified_time, self.md5_checksum),
        )
        .with_size(size);
        if let Some(mime) = self.mime_type {
            file = file.with_mime_type(mime);
        }
        file
    }
}

/// Lists the direct children of each scope folder ID.
///
/// An empty folder list means the drive root.
pub struct GoogleDriveStore {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    base_url: String,
}

impl GoogleDriveStore {
    pub fn new(client: reqwest::Client, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn list_folder(&self, token: &str, folder: &str) -> Result<Vec<RemoteFile>> {
        let query = format!(
            "'{}' in parents and trashed = false and mimeType != '{}'",
            folder.replace('\'', "\\'"),
            FOLDER_MIME
        );
        let url = format!("{}/files", self.base_url);

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(&[("q", query.as_str()), ("fields", LIST_FIELDS), ("pageSize", PAGE_SIZE)]);
            if let Some(ref t) = page_token {
                request = request.query(&[("pageToken", t.as_str())]);
            }

            let response = check_listing(request.send().await.map_err(transport_error)?).await?;
            let page: FileList = response.json().await.map_err(|e| {
                Error::SourceUnavailable(format!("malformed Drive listing: {}", e))
            })?;

            for file in page.files {
                let native = file
                    .mime_type
                    .as_deref()
                    .map(|m| m.starts_with(NATIVE_MIME_PREFIX))
                    .unwrap_or(false);
                if native {
                    debug!(file = %file.id, "Skipping native Google document");
                    continue;
                }
                files.push(file.into_remote());
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl ContentStore for GoogleDriveStore {
    async fn list(&self, connector: &Connector) -> Result<Vec<RemoteFile>> {
        let token = bearer_token(self.credentials.as_ref(), connector)?;
        let folders: Vec<&str> = if connector.scope.folders.is_empty() {
            vec!["root"]
        } else {
            connector.scope.folders.iter().map(String::as_str).collect()
        };

        let mut files = Vec::new();
        for folder in folders {
            files.extend(self.list_folder(&token, folder).await?);
        }
        debug!(connector = %connector.name, count = files.len(), "Listed Drive files");
        Ok(files)
    }

    async fn read(&self, connector: &Connector, file: &RemoteFile) -> Result<Vec<u8>> {
        let token = bearer_token(self.credentials.as_ref(), connector)?;
        let url = format!("{}/files/{}", self.base_url, file.file_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_download(response, &file.file_id).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}
