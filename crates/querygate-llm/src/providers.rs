//! HTTP backends: OpenAI-compatible, Anthropic Messages, and Ollama.
//!
//! All requests use temperature 0. Timeouts are configured on the client;
//! retries are applied by wrapping a backend in [`crate::Retrying`].

use crate::{CompletionService, EmbeddingService, LlmError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| LlmError::Config(format!("failed to build http client: {e}")))
}

pub fn normalize_http_base_url(base_url: &str, default: &str) -> String {
    let mut host = base_url.trim().to_string();
    if host.is_empty() {
        host = default.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("https://{host}");
    }
    host.trim_end_matches('/').to_string()
}

pub fn normalize_ollama_host(host: &str) -> String {
    let mut host = host.trim().to_string();
    if host.is_empty() {
        // 127.0.0.1 rather than localhost: some installs do not listen on ::1.
        host = DEFAULT_OLLAMA_HOST.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("http://{host}");
    }
    host.trim_end_matches('/').to_string()
}

async fn send_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
    backend: &str,
) -> Result<serde_json::Value, LlmError> {
    let resp = request
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::Network(format!("failed to reach {backend}: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Http {
            status: status.as_u16(),
            body: text,
        });
    }

    resp.json()
        .await
        .map_err(|e| LlmError::InvalidResponse(format!("{backend} returned invalid JSON: {e}")))
}

fn require_key(key: &str, env_name: &str) -> Result<String, LlmError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(LlmError::Config(format!(
            "backend requires {env_name} (set it in your env; do not hardcode secrets in scripts)"
        )));
    }
    Ok(key.to_string())
}

// =============================================================================
// OpenAI-compatible backend (chat completions + embeddings)
// =============================================================================

#[cfg(feature = "openai")]
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
}

#[cfg(feature = "openai")]
impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Option<Duration>) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: normalize_http_base_url(base_url, DEFAULT_OPENAI_BASE_URL),
            api_key: require_key(api_key, "OPENAI_API_KEY")?,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        })
    }

    pub fn with_chat_model(mut self, model: &str) -> Self {
        self.chat_model = model.to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.chat_model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": prompt }]
        });
        let v = send_json(
            self.client.post(&url).bearer_auth(&self.api_key),
            &body,
            "openai",
        )
        .await?;
        v.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                LlmError::InvalidResponse("openai: no message content in response".to_string())
            })
    }

    fn describe(&self) -> String {
        format!("openai:{}", self.chat_model)
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl EmbeddingService for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        #[derive(Deserialize)]
        struct EmbeddingsResponse {
            data: Vec<EmbeddingsRow>,
        }

        #[derive(Deserialize)]
        struct EmbeddingsRow {
            embedding: Vec<f32>,
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.embedding_model,
            "input": text,
            "encoding_format": "float"
        });
        let v = send_json(
            self.client.post(&url).bearer_auth(&self.api_key),
            &body,
            "openai",
        )
        .await?;
        let parsed: EmbeddingsResponse = serde_json::from_value(v).map_err(|e| {
            LlmError::InvalidResponse(format!("openai embeddings returned invalid JSON: {e}"))
        })?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("openai returned no embedding".to_string()))
    }

    fn describe(&self) -> String {
        format!("openai:{}", self.embedding_model)
    }
}

// =============================================================================
// Anthropic backend (Messages API)
// =============================================================================

#[cfg(feature = "anthropic")]
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    version: String,
    model: String,
    max_tokens: u32,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Option<Duration>) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: normalize_http_base_url(base_url, DEFAULT_ANTHROPIC_BASE_URL),
            api_key: require_key(api_key, "ANTHROPIC_API_KEY")?,
            version: DEFAULT_ANTHROPIC_VERSION.to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[cfg(feature = "anthropic")]
fn anthropic_extract_output_text(v: &serde_json::Value) -> Option<String> {
    let mut out = String::new();
    for block in v.get("content")?.as_array()? {
        if block.get("type").and_then(|x| x.as_str()) != Some("text") {
            continue;
        }
        if let Some(t) = block.get("text").and_then(|x| x.as_str()) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(t);
        }
    }
    let trimmed = out.trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl CompletionService for AnthropicClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "messages": [{ "role": "user", "content": prompt }]
        });
        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version);
        let v = send_json(request, &body, "anthropic").await?;
        anthropic_extract_output_text(&v).ok_or_else(|| {
            LlmError::InvalidResponse("anthropic: no text blocks in response".to_string())
        })
    }

    fn describe(&self) -> String {
        format!("anthropic:{}", self.model)
    }
}

// =============================================================================
// Ollama backend (local)
// =============================================================================

#[cfg(feature = "ollama")]
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    chat_model: String,
    embedding_model: String,
}

#[cfg(feature = "ollama")]
impl OllamaClient {
    pub fn new(host: &str, timeout: Option<Duration>) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(timeout)?,
            host: normalize_ollama_host(host),
            chat_model: "llama3.1".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
        })
    }

    pub fn with_chat_model(mut self, model: &str) -> Self {
        self.chat_model = model.to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }
}

#[cfg(feature = "ollama")]
#[async_trait]
impl CompletionService for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.host);
        let body = json!({
            "model": self.chat_model,
            "stream": false,
            "messages": [{ "role": "user", "content": prompt }],
            "options": { "temperature": 0 }
        });
        let v = send_json(self.client.post(&url), &body, "ollama").await?;
        v.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse("ollama: no message content".to_string()))
    }

    fn describe(&self) -> String {
        format!("ollama:{}", self.chat_model)
    }
}

#[cfg(feature = "ollama")]
#[async_trait]
impl EmbeddingService for OllamaClient {
    /// Prefers `/api/embed`; falls back to `/api/embeddings` on older servers.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/api/embed", self.host);
        let body = json!({ "model": self.embedding_model, "input": text });
        match send_json(self.client.post(&url), &body, "ollama").await {
            Ok(v) => {
                #[derive(Deserialize)]
                struct EmbedResp {
                    embeddings: Vec<Vec<f32>>,
                }
                let parsed: EmbedResp = serde_json::from_value(v).map_err(|e| {
                    LlmError::InvalidResponse(format!("ollama /api/embed invalid JSON: {e}"))
                })?;
                return parsed.embeddings.into_iter().next().ok_or_else(|| {
                    LlmError::InvalidResponse("ollama returned no embedding".to_string())
                });
            }
            Err(LlmError::Http { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }

        #[derive(Deserialize)]
        struct EmbeddingsResp {
            embedding: Vec<f32>,
        }
        let url = format!("{}/api/embeddings", self.host);
        let body = json!({ "model": self.embedding_model, "prompt": text });
        let v = send_json(self.client.post(&url), &body, "ollama").await?;
        let parsed: EmbeddingsResp = serde_json::from_value(v).map_err(|e| {
            LlmError::InvalidResponse(format!("ollama /api/embeddings invalid JSON: {e}"))
        })?;
        Ok(parsed.embedding)
    }

    fn describe(&self) -> String {
        format!("ollama:{}", self.embedding_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_http_base_url("api.example.com/", DEFAULT_OPENAI_BASE_URL),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_http_base_url("  ", DEFAULT_OPENAI_BASE_URL),
            DEFAULT_OPENAI_BASE_URL
        );
    }

    #[test]
    fn test_normalize_ollama_host() {
        assert_eq!(normalize_ollama_host("localhost:11434"), "http://localhost:11434");
        assert_eq!(normalize_ollama_host(""), DEFAULT_OLLAMA_HOST);
    }

    #[cfg(feature = "openai")]
    #[test]
    fn test_openai_requires_key() {
        let err = OpenAiClient::new("  ", "", None).unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }

    #[cfg(feature = "anthropic")]
    #[test]
    fn test_anthropic_text_extraction() {
        let v = json!({
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "SELECT 1" }
            ]
        });
        assert_eq!(anthropic_extract_output_text(&v).as_deref(), Some("SELECT 1"));
    }
}
