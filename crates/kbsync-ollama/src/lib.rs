//! kbsync Ollama - Embedding generation through a local Ollama server.

mod client;
mod error;
mod types;

pub use client::OllamaClient;
pub use error::{OllamaError, OllamaResult};
pub use types::*;
