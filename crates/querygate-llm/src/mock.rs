//! Deterministic collaborators for tests and offline runs.

use crate::token_hash::TokenHashEmbedder;
use crate::{CompletionService, EmbeddingService, LlmError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Route {
    needle: String,
    responses: Vec<String>,
    next: usize,
}

/// Scripted completion service.
///
/// Each route matches prompts containing its needle and replays its
/// responses in order; the last response repeats once the script runs out.
/// Prompts matching no route get the fallback response.
pub struct MockCompletion {
    routes: Mutex<Vec<Route>>,
    fallback: String,
    fail_first: usize,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletion {
    pub fn always(response: &str) -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fallback: response.to_string(),
            fail_first: 0,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Add a route answering prompts that contain `needle`.
    pub fn route<I, S>(self, needle: &str, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.lock().push(Route {
            needle: needle.to_string(),
            responses: responses.into_iter().map(Into::into).collect(),
            next: 0,
        });
        self
    }

    /// Fail the first `n` calls with a transient network error.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Prompts received that contain `needle`.
    pub fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.prompts
            .lock()
            .iter()
            .filter(|p| p.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if call < self.fail_first {
            return Err(LlmError::Network(format!("mock failure #{}", call + 1)));
        }

        let mut routes = self.routes.lock();
        for route in routes.iter_mut() {
            if !prompt.contains(&route.needle) || route.responses.is_empty() {
                continue;
            }
            let idx = route.next.min(route.responses.len() - 1);
            route.next += 1;
            return Ok(route.responses[idx].clone());
        }
        Ok(self.fallback.clone())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Token-hash embedder that fails for chosen inputs.
pub struct MockEmbedder {
    inner: TokenHashEmbedder,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            inner: TokenHashEmbedder::new(dim),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make `embed(text)` fail with a non-transient error.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(text) {
            return Err(LlmError::InvalidResponse(format!(
                "mock embedder refuses {text:?}"
            )));
        }
        self.inner.embed(text).await
    }

    fn describe(&self) -> String {
        format!("mock-embedder:{}", self.inner.dim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_replay_then_repeat_last() {
        let mock = MockCompletion::always("fallback")
            .route("PLAN", ["p1", "p2"])
            .route("SQL", ["s1"]);
        assert_eq!(mock.complete("PLAN please").await.unwrap(), "p1");
        assert_eq!(mock.complete("PLAN again").await.unwrap(), "p2");
        assert_eq!(mock.complete("PLAN more").await.unwrap(), "p2");
        assert_eq!(mock.complete("write SQL").await.unwrap(), "s1");
        assert_eq!(mock.complete("other").await.unwrap(), "fallback");
        assert_eq!(mock.calls(), 5);
        assert_eq!(mock.prompts_containing("PLAN").len(), 3);
    }

    #[tokio::test]
    async fn test_failing_embedder() {
        let embedder = MockEmbedder::new(16).failing_on("bad");
        assert!(embedder.embed("bad").await.is_err());
        assert_eq!(embedder.embed("good").await.unwrap().len(), 16);
    }
}
