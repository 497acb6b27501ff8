//! Content stores: listing and reading files for each provider kind.

mod credentials;
mod google_drive;
mod local;
mod onedrive;

pub use credentials::{CredentialStore, EnvCredentialStore, StaticCredentialStore};
pub use google_drive::GoogleDriveStore;
pub use local::LocalFolderStore;
pub use onedrive::OneDriveStore;

use crate::error::IngestError;
use kbsync_core::{Connector, ContentStore, Error, ProviderKind, Result};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Content store per provider kind.
#[derive(Clone, Default)]
pub struct ContentStores {
    stores: HashMap<ProviderKind, Arc<dyn ContentStore>>,
}

impl ContentStores {
    /// No stores registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Local folders, Google Drive and OneDrive.
    pub fn standard(credentials: Arc<dyn CredentialStore>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::empty()
            .register(ProviderKind::LocalFolder, Arc::new(LocalFolderStore::new()))
            .register(
                ProviderKind::GoogleDrive,
                Arc::new(GoogleDriveStore::new(client.clone(), credentials.clone())),
            )
            .register(
                ProviderKind::OneDrive,
                Arc::new(OneDriveStore::new(client, credentials)),
            ))
    }

    pub fn register(mut self, provider: ProviderKind, store: Arc<dyn ContentStore>) -> Self {
        self.stores.insert(provider, store);
        self
    }

    /// The store serving a connector's provider.
    pub fn for_connector(&self, connector: &Connector) -> Result<Arc<dyn ContentStore>> {
        self.stores.get(&connector.provider).cloned().ok_or_else(|| {
            Error::SourceUnavailable(format!("no content store for provider {}", connector.provider))
        })
    }
}

/// Bearer token for a connector, via its credential reference.
pub(crate) fn bearer_token(credentials: &dyn CredentialStore, connector: &Connector) -> Result<String> {
    let credential_ref = connector
        .credential_ref
        .as_deref()
        .ok_or_else(|| IngestError::MissingCredential(connector.name.clone()))?;
    Ok(credentials.token(credential_ref)?)
}

pub(crate) fn transport_error(err: reqwest::Error) -> Error {
    Error::SourceUnavailable(err.to_string())
}

/// Map a failed listing response. Every failure is connector-level.
pub(crate) async fn check_listing(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::SourceUnavailable(format!(
        "listing failed with {}: {}",
        status,
        truncate(&body, 200)
    )))
}

/// Map a failed download. A 404 means the file vanished after listing.
pub(crate) async fn check_download(response: reqwest::Response, file_id: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(Error::NotFound(file_id.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::SourceUnavailable(format!(
        "download of {} failed with {}: {}",
        file_id,
        status,
        truncate(&body, 200)
    )))
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
