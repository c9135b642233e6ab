//! External model collaborators
//!
//! The pipeline talks to two services:
//!
//! - a text-completion service (`prompt -> text`), used for planning, SQL
//!   generation and answer summarization
//! - an embedding service (`text -> vector`), used by the similarity index
//!
//! Both are async traits so backends can be swapped freely. [`Retrying`]
//! wraps either one with a bounded, fixed-delay retry policy. HTTP backends
//! live behind the `openai`, `anthropic` and `ollama` features.

pub mod json;
pub mod mock;
#[cfg(any(feature = "openai", feature = "anthropic", feature = "ollama"))]
pub mod providers;
pub mod retry;
pub mod token_hash;

use async_trait::async_trait;
use std::sync::Arc;

pub use json::parse_llm_json_object;
pub use mock::{MockCompletion, MockEmbedder};
pub use retry::{RetryPolicy, Retrying};
pub use token_hash::TokenHashEmbedder;

/// Text-completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Short label for logs (`openai:gpt-4o-mini`, `mock`, ...).
    fn describe(&self) -> String;
}

/// Embedding service. Vectors from one service share a fixed dimension.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    fn describe(&self) -> String;
}

#[async_trait]
impl<T: CompletionService + ?Sized> CompletionService for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        (**self).complete(prompt).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[async_trait]
impl<T: EmbeddingService + ?Sized> EmbeddingService for Arc<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        (**self).embed(text).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<LlmError>,
    },
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Api(_) => true,
            LlmError::Http { status, .. } => *status == 429 || *status >= 500,
            LlmError::InvalidResponse(_) | LlmError::Config(_) => false,
            LlmError::RetriesExhausted { .. } => false,
        }
    }
}
