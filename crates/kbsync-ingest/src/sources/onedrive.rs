//! OneDrive content store over Microsoft Graph.

use super::{bearer_token, check_download, check_listing, transport_error, CredentialStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kbsync_core::{Connector, ContentStore, Error, ModificationSignature, RemoteFile, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    size: u64,
    file: Option<FileFacet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileFacet {
    mime_type: Option<String>,
    #[serde(default)]
    hashes: Hashes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hashes {
    sha1_hash: Option<String>,
    quick_xor_hash: Option<String>,
}

/// Lists the direct children of each scope folder item ID.
///
/// `root` or an empty folder list means the drive root.
pub struct OneDriveStore {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    base_url: String,
}

impl OneDriveStore {
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

    fn children_url(&self, folder: &str) -> String {
        if folder.is_empty() || folder == "root" {
            format!("{}/me/drive/root/children", self.base_url)
        } else {
            format!("{}/me/drive/items/{}/children", self.base_url, folder)
        }
    }

    async fn list_folder(&self, token: &str, folder: &str) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut next = Some(self.children_url(folder));

        while let Some(url) = next.take() {
            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(transport_error)?;
            let page: ChildrenPage = check_listing(response)
                .await?
                .json()
                .await
                .map_err(|e| Error::SourceUnavailable(format!("malformed Graph listing: {}", e)))?;

            for item in page.value {
                // Folders have no file facet
                let Some(facet) = item.file else { continue };
                let hash = facet.hashes.sha1_hash.or(facet.hashes.quick_xor_hash);
                let mut file = RemoteFile::new(
                    item.id,
                    item.name,
                    ModificationSignature::new(item.last_modified_date_time, hash),
                )
                .with_size(item.size);
                if let Some(mime) = facet.mime_type {
                    file = file.with_mime_type(mime);
                }
                files.push(file);
            }

            next = page.next_link;
        }

        Ok(files)
    }
}

#[async_trait]
impl ContentStore for OneDriveStore {
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
        debug!(connector = %connector.name, count = files.len(), "Listed OneDrive files");
        Ok(files)
    }

    async fn read(&self, connector: &Connector, file: &RemoteFile) -> Result<Vec<u8>> {
        let token = bearer_token(self.credentials.as_ref(), connector)?;
        let url = format!("{}/me/drive/items/{}/content", self.base_url, file.file_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_download(response, &file.file_id).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}
