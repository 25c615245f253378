//! Retrieval-augmented answering over a directory of documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use runtime::{Backend, Message, ModelError, ModelRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::chunk::{self, Chunk};
use super::embed::Embedder;
use super::index::{Hit, VectorIndex};
use crate::error::ProviderError;

/// Chunks embedded per request to the embedder.
const EMBED_BATCH: usize = 32;

const DOCUMENT_EXTENSIONS: &[&str] = &["txt", "md"];

#[derive(Debug, Error)]
pub enum RagError {
    #[error("no documents have been ingested")]
    NotIngested,

    #[error("no .txt or .md documents found in {0}")]
    NoDocuments(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("answer synthesis failed: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Words per chunk.
    pub chunk_size: usize,
    /// Words shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunks retrieved per query.
    pub top_k: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            chunk_overlap: 20,
            top_k: 2,
        }
    }
}

pub struct RagPipeline<B> {
    backend: B,
    embedder: Arc<dyn Embedder>,
    config: RagConfig,
    index: RwLock<VectorIndex>,
}

impl<B: Backend> RagPipeline<B> {
    pub fn new(backend: B, embedder: Arc<dyn Embedder>, config: RagConfig) -> Self {
        Self {
            backend,
            embedder,
            config,
            index: RwLock::new(VectorIndex::new()),
        }
    }

    /// Number of indexed chunks.
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    /// Index every `.txt` and `.md` file directly inside `dir`. Returns the
    /// number of chunks added.
    pub async fn ingest_dir(&self, dir: impl AsRef<Path>) -> Result<usize, RagError> {
        let dir = dir.as_ref();
        let io_error = |source| RagError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            let is_document = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_document && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            return Err(RagError::NoDocuments(dir.to_path_buf()));
        }

        let mut added = 0;
        for path in paths {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| RagError::Io {
                    path: path.clone(),
                    source,
                })?;
            added += self.ingest_text(&path.display().to_string(), &text).await?;
        }

        info!(dir = %dir.display(), chunks = added, "Ingested documents");
        Ok(added)
    }

    /// Index one document. Returns the number of chunks added.
    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<usize, RagError> {
        let chunks = chunk::split(source, text, self.config.chunk_size, self.config.chunk_overlap);
        let mut embedded: Vec<(Chunk, Vec<f32>)> = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            embedded.extend(batch.iter().cloned().zip(vectors));
        }

        let added = embedded.len();
        let mut index = self.index.write().await;
        for (chunk, vector) in embedded {
            index.insert(chunk, vector);
        }
        debug!(%source, chunks = added, "Indexed document");
        Ok(added)
    }

    /// The chunks most relevant to `question`.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<Hit>, RagError> {
        if self.index.read().await.is_empty() {
            return Err(RagError::NotIngested);
        }

        let query = self.embedder.embed(&[question.to_string()]).await?;
        let vector = query
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding response".into()))?;

        Ok(self.index.read().await.search(&vector, self.config.top_k))
    }

    /// Retrieve context for `question` and have the model answer from it.
    pub async fn query(&self, question: &str) -> Result<String, RagError> {
        let hits = self.retrieve(question).await?;
        debug!(hits = hits.len(), "Retrieved context");

        let messages = [Message::user(answer_prompt(question, &hits))];
        let response = self.backend.call(ModelRequest::new(&messages)).await?;
        Ok(response.text)
    }
}

fn answer_prompt(question: &str, hits: &[Hit]) -> String {
    let context = hits
        .iter()
        .map(|hit| format!("source: {}\n{}", hit.chunk.source, hit.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\n\
         Answer: "
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::HashingEmbedder;
    use runtime::{ModelResponse, Usage};

    /// Answers with the prompt it was given.
    struct Echo;

    impl Backend for Echo {
        async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse {
                text: request.messages[0].content.clone(),
                usage: Usage::default(),
            })
        }
    }

    fn pipeline() -> RagPipeline<Echo> {
        RagPipeline::new(Echo, Arc::new(HashingEmbedder::default()), RagConfig::default())
    }

    #[tokio::test]
    async fn querying_before_ingestion_fails() {
        let err = pipeline().query("anything").await.unwrap_err();
        assert!(matches!(err, RagError::NotIngested));
        assert_eq!(err.to_string(), "no documents have been ingested");
    }

    #[tokio::test]
    async fn ingests_directory_and_answers_from_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("training.md"),
            "DeepSeek-R1 was trained with large scale reinforcement learning after a cold start.",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("fruit.txt"),
            "Bananas are yellow and grow in tropical climates.",
        )
        .unwrap();
        std::fs::write(dir.path().join("weights.bin"), [0u8, 159, 146, 150]).unwrap();

        let rag = pipeline();
        assert_eq!(rag.ingest_dir(dir.path()).await.unwrap(), 2);
        assert_eq!(rag.len().await, 2);

        let hits = rag.retrieve("How was DeepSeek-R1 trained?").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].chunk.source.ends_with("training.md"));

        let answer = rag.query("How was DeepSeek-R1 trained?").await.unwrap();
        assert!(answer.contains("reinforcement learning"));
        assert!(answer.contains("Query: How was DeepSeek-R1 trained?"));
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = pipeline().ingest_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, RagError::NoDocuments(_)));
    }
}
