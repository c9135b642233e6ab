//! Similarity index for retrieval context
//!
//! Stores schema and metric cards with unit-normalized embeddings and
//! returns the `k` most similar cards for a question (cosine similarity via
//! inner product).
//!
//! The vector file and the metadata array are always written and read as a
//! pair. Mutation is serialized through an async writer lock; queries take
//! the read side so they never observe a half-written pair from this
//! process.

pub mod flat;
pub mod store;

use querygate_llm::{EmbeddingService, LlmError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use flat::{normalize_in_place, normalized, FlatIpIndex};
pub use store::{IndexPaths, RecordMeta};

use store::StoredPair;

const DIM_PROBE_TEXT: &str = "dimension probe";

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode index artifact: {0}")]
    Encode(String),
    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
    #[error("unsupported vector file version: {0}")]
    UnsupportedVersion(String),
    #[error("index artifacts disagree: {vectors} vectors, {records} metadata records")]
    Inconsistent { vectors: usize, records: usize },
    #[error("index artifact {} exists without its pair", present.display())]
    Unpaired { present: PathBuf },
    #[error("query embedding has dimension {got}, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),
}

pub struct SimilarityIndex {
    paths: IndexPaths,
    embedder: Arc<dyn EmbeddingService>,
    lock: RwLock<()>,
}

impl SimilarityIndex {
    pub fn new(paths: IndexPaths, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            paths,
            embedder,
            lock: RwLock::new(()),
        }
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Embed and append `(content, source)` items, then rewrite both
    /// artifacts. Items whose embedding fails or has the wrong dimension are
    /// logged and skipped. Returns the number inserted.
    pub async fn insert(&self, items: &[(String, String)]) -> Result<usize, IndexError> {
        let _writer = self.lock.write().await;

        let (mut index, mut records) = match store::load_pair(&self.paths)? {
            StoredPair::Both(index, records) => (index, records),
            StoredPair::Neither => {
                let probe = self.embedder.embed(DIM_PROBE_TEXT).await?;
                tracing::debug!(
                    dim = probe.len(),
                    embedder = %self.embedder.describe(),
                    "creating similarity index"
                );
                (FlatIpIndex::new(probe.len()), Vec::new())
            }
            StoredPair::Partial(present) => return Err(IndexError::Unpaired { present }),
        };

        let mut inserted = 0usize;
        for (content, source) in items {
            match self.embedder.embed(content).await {
                Ok(vector) if vector.len() == index.dim() => {
                    index.push(normalized(vector));
                    records.push(RecordMeta {
                        source: source.clone(),
                        content: content.clone(),
                    });
                    inserted += 1;
                }
                Ok(vector) => {
                    tracing::warn!(
                        source = %source,
                        expected = index.dim(),
                        got = vector.len(),
                        "embedding dimension mismatch; skipping item"
                    );
                }
                Err(err) => {
                    tracing::warn!(source = %source, error = %err, "embedding failed; skipping item");
                }
            }
        }

        store::save_pair(&self.paths, &index, &records)?;
        tracing::info!(inserted, total = records.len(), "similarity index updated");
        Ok(inserted)
    }

    /// Contents of the `k` records most similar to `text`, best first.
    ///
    /// Missing artifacts mean an empty index.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<String>, IndexError> {
        let _reader = self.lock.read().await;

        let (index, records) = match store::load_pair(&self.paths)? {
            StoredPair::Both(index, records) => (index, records),
            StoredPair::Neither | StoredPair::Partial(_) => return Ok(Vec::new()),
        };
        if index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = normalized(self.embedder.embed(text).await?);
        if query.len() != index.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: index.dim(),
                got: query.len(),
            });
        }

        Ok(index
            .search(&query, k)
            .into_iter()
            .map(|(pos, _)| records[pos].content.clone())
            .collect())
    }

    /// Number of stored records; zero when no index exists yet.
    pub async fn len(&self) -> Result<usize, IndexError> {
        let _reader = self.lock.read().await;
        match store::load_pair(&self.paths)? {
            StoredPair::Both(_, records) => Ok(records.len()),
            _ => Ok(0),
        }
    }
}
