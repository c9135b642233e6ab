//! Completion/embedding backend selection.
//!
//! Remote backends are wrapped in [`Retrying`] with the configured policy.

use crate::config::{EmbedBackend, LlmBackend, Settings};
use anyhow::{anyhow, Context, Result};
use querygate_llm::{
    CompletionService, EmbeddingService, MockCompletion, Retrying, TokenHashEmbedder,
};
use querygate_pipeline::prompts::{PLAN_HEADER, SQL_HEADER, SUMMARY_HEADER};
use std::sync::Arc;

/// Offline completion script. It always proposes a catalog query, so the
/// full path only passes when `information_schema` is allow-listed; with
/// the default allow-list it demonstrates the lint rejection path.
pub fn mock_completion() -> MockCompletion {
    MockCompletion::always("")
        .route(PLAN_HEADER, [r#"{"tables": ["information_schema.tables"]}"#])
        .route(
            SQL_HEADER,
            ["SELECT table_schema, count(*) AS tables FROM information_schema.tables GROUP BY table_schema"],
        )
        .route(SUMMARY_HEADER, ["(mock backend) see the rows above."])
}

pub fn completion_service(settings: &Settings) -> Result<Arc<dyn CompletionService>> {
    let policy = settings.retry_policy();
    let model = settings.llm_model.as_deref();
    let service: Arc<dyn CompletionService> = match settings.llm_backend {
        LlmBackend::Mock => Arc::new(mock_completion()),
        #[cfg(feature = "llm-openai")]
        LlmBackend::OpenAi => {
            let mut client = querygate_llm::providers::OpenAiClient::new(
                &settings.openai_api_key,
                &settings.openai_base_url,
                settings.api_timeout(),
            )
            .context("configuring the OpenAI completion backend")?;
            if let Some(model) = model {
                client = client.with_chat_model(model);
            }
            Arc::new(Retrying::new(client, policy))
        }
        #[cfg(feature = "llm-anthropic")]
        LlmBackend::Anthropic => {
            let mut client = querygate_llm::providers::AnthropicClient::new(
                &settings.anthropic_api_key,
                &settings.anthropic_base_url,
                settings.api_timeout(),
            )
            .context("configuring the Anthropic completion backend")?;
            if let Some(model) = model {
                client = client.with_model(model);
            }
            Arc::new(Retrying::new(client, policy))
        }
        #[cfg(feature = "llm-ollama")]
        LlmBackend::Ollama => {
            let mut client = querygate_llm::providers::OllamaClient::new(
                &settings.ollama_host,
                settings.api_timeout(),
            )
            .context("configuring the Ollama completion backend")?;
            if let Some(model) = model {
                client = client.with_chat_model(model);
            }
            Arc::new(Retrying::new(client, policy))
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(anyhow!(
                "completion backend {other:?} is not compiled in (enable the matching llm-* feature)"
            ))
        }
    };
    tracing::debug!(backend = %service.describe(), "completion backend ready");
    Ok(service)
}

pub fn embedding_service(settings: &Settings) -> Result<Arc<dyn EmbeddingService>> {
    let policy = settings.retry_policy();
    let model = settings.embed_model.as_deref();
    let service: Arc<dyn EmbeddingService> = match settings.embed_backend {
        EmbedBackend::TokenHash => Arc::new(TokenHashEmbedder::default()),
        #[cfg(feature = "llm-openai")]
        EmbedBackend::OpenAi => {
            let mut client = querygate_llm::providers::OpenAiClient::new(
                &settings.openai_api_key,
                &settings.openai_base_url,
                settings.api_timeout(),
            )
            .context("configuring the OpenAI embedding backend")?;
            if let Some(model) = model {
                client = client.with_embedding_model(model);
            }
            Arc::new(Retrying::new(client, policy))
        }
        #[cfg(feature = "llm-ollama")]
        EmbedBackend::Ollama => {
            let mut client = querygate_llm::providers::OllamaClient::new(
                &settings.ollama_host,
                settings.api_timeout(),
            )
            .context("configuring the Ollama embedding backend")?;
            if let Some(model) = model {
                client = client.with_embedding_model(model);
            }
            Arc::new(Retrying::new(client, policy))
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(anyhow!(
                "embedding backend {other:?} is not compiled in (enable the matching llm-* feature)"
            ))
        }
    };
    tracing::debug!(backend = %service.describe(), "embedding backend ready");
    Ok(service)
}
