//! Ollama HTTP client.

use crate::error::{OllamaError, OllamaResult};
use crate::types::*;
use async_trait::async_trait;
use kbsync_config::OllamaConfig;
use kbsync_core::{BackendError, EmbeddingBackend};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Client for interacting with Ollama's API.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a new client from configuration.
    pub fn from_config(config: &OllamaConfig) -> OllamaResult<Self> {
        Self::build(
            &config.host,
            &config.embedding_model,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    /// Create a new client with default settings.
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> OllamaResult<Self> {
        Self::build(&host.into(), &model.into(), Duration::from_secs(120))
    }

    fn build(host: &str, model: &str, timeout: Duration) -> OllamaResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(OllamaError::Http)?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn send_error(&self, e: reqwest::Error) -> OllamaError {
        if e.is_connect() {
            OllamaError::ServerNotRunning {
                host: self.host.clone(),
            }
        } else if e.is_timeout() {
            OllamaError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            OllamaError::Http(e)
        }
    }

    /// Check if Ollama server is available.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// List all available models.
    pub async fn list_models(&self) -> OllamaResult<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.host);
        debug!("Listing models from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(OllamaError::ApiError {
                status,
                message: text,
            });
        }

        let list: ListModelsResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::ParseError(e.to_string()))?;
        Ok(list.models)
    }

    /// Check if the configured embedding model is available.
    pub async fn has_model(&self) -> OllamaResult<bool> {
        let models = self.list_models().await?;
        // Check both exact match and model without tag
        Ok(models.iter().any(|m| {
            m.name == self.model || m.name.starts_with(&format!("{}:", self.model))
        }))
    }

    /// Generate an embedding for one text.
    pub async fn embed_one(&self, text: &str) -> OllamaResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.host);
        debug!("Generating embedding with model {} for text length {}", self.model, text.len());

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|r| r.error)
                .unwrap_or(text);

            // Ollama reports a missing model as 404 or with "not found"
            if status.as_u16() == 404 || (status.is_client_error() && message.contains("not found")) {
                return Err(OllamaError::ModelNotFound {
                    model: self.model.clone(),
                });
            }

            return Err(OllamaError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::ParseError(e.to_string()))?;
        if embedding_response.embedding.is_empty() {
            return Err(OllamaError::ParseError(format!(
                "model {} returned an empty embedding",
                self.model
            )));
        }

        Ok(embedding_response.embedding)
    }

    /// Generate embeddings for multiple texts, in order.
    pub async fn embed_batch(&self, texts: &[String]) -> OllamaResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for text in texts {
            let embedding = self.embed_one(text).await?;
            embeddings.push(embedding);
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(self.embed_batch(texts).await?)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
