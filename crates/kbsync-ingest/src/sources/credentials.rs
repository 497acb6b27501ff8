//! Resolving connector credential references to bearer tokens.

use crate::error::{IngestError, IngestResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves the opaque credential reference stored on a connector.
pub trait CredentialStore: Send + Sync {
    fn token(&self, credential_ref: &str) -> IngestResult<String>;
}

/// Reads tokens from the environment variable named by the reference.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn token(&self, credential_ref: &str) -> IngestResult<String> {
        match std::env::var(credential_ref) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(IngestError::MissingCredential(credential_ref.to_string())),
        }
    }
}

/// Fixed tokens held in memory.
#[derive(Debug, Default)]
pub struct StaticCredentialStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, credential_ref: impl Into<String>, token: impl Into<String>) -> Self {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(credential_ref.into(), token.into());
        }
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn token(&self, credential_ref: &str) -> IngestResult<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|tokens| tokens.get(credential_ref).cloned())
            .ok_or_else(|| IngestError::MissingCredential(credential_ref.to_string()))
    }
}
