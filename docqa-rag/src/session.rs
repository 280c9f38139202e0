//! Session orchestrator.
//!
//! A [`Session`] owns the vector index built from the user's documents and
//! the conversation memory of one chat. It wires the chunker, the embedding
//! gateway, the ensemble retriever and the answer synthesizer into the two
//! user-facing actions: "start" (index documents) and "ask".
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{Document, RagConfig, Session};
//!
//! let session = Session::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .generative_provider(Arc::new(generator))
//!     .build()?;
//!
//! session.start(&[Document::new(text, "report.pdf")]).await?;
//! let answer = session.ask("What does the report conclude?").await?;
//! println!("{}", answer.text);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::{Chunk, Document, FusedResult};
use crate::embedding::{EmbeddingProvider, check_embeddings};
use crate::ensemble::EnsembleRetriever;
use crate::error::{RagError, Result};
use crate::generation::GenerativeProvider;
use crate::index::InMemoryVectorIndex;
use crate::memory::{ConversationMemory, Message};
use crate::synthesis::{
    AnswerSynthesizer, FusedContext, INSUFFICIENT_INFORMATION, PromptSynthesizer,
    SynthesisRequest,
};

/// Outcome of a [`Session::start`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingReport {
    /// Documents received.
    pub documents: usize,
    /// Chunks embedded into the new index.
    pub chunks: usize,
    /// Generation of the index now in service; `None` if no index exists.
    pub generation: Option<u64>,
}

/// Whether an answer was synthesized from retrieved evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Grounded,
    InsufficientInformation,
}

/// A reply to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub status: AnswerStatus,
    /// The fused results the answer was synthesized from.
    pub sources: Vec<FusedResult>,
}

impl Answer {
    fn insufficient() -> Self {
        Self {
            text: INSUFFICIENT_INFORMATION.to_string(),
            status: AnswerStatus::InsufficientInformation,
            sources: Vec::new(),
        }
    }
}

struct IndexSnapshot {
    generation: u64,
    index: Arc<InMemoryVectorIndex>,
}

/// One user's document set and conversation.
///
/// Readers take a snapshot of the current index, so a rebuild in progress
/// never exposes a partially built index: the new index replaces the old one
/// only after every chunk has been embedded. Construct one via
/// [`Session::builder()`].
pub struct Session {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    generative_provider: Arc<dyn GenerativeProvider>,
    chunker: Arc<dyn Chunker>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    index: RwLock<Option<IndexSnapshot>>,
    generation: AtomicU64,
    memory: Mutex<ConversationMemory>,
}

impl Session {
    /// Create a new [`SessionBuilder`].
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Return a reference to the session configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Returns `true` once an index has been built.
    pub async fn has_index(&self) -> bool {
        self.index.read().await.is_some()
    }

    /// Generation of the index in service, incremented on every rebuild.
    pub async fn index_generation(&self) -> Option<u64> {
        self.index.read().await.as_ref().map(|s| s.generation)
    }

    /// Number of chunks in the index in service.
    pub async fn indexed_chunks(&self) -> usize {
        self.index.read().await.as_ref().map_or(0, |s| s.index.len())
    }

    /// Index `documents`, replacing any previous index.
    ///
    /// Documents are normalized, chunked with the configured strategy and
    /// embedded in one batch. With zero documents the current index is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns the chunker's or embedding provider's error. The previous
    /// index stays in service when this fails.
    pub async fn start(&self, documents: &[Document]) -> Result<IndexingReport> {
        if documents.is_empty() {
            warn!("no documents supplied, index left unchanged");
            return Ok(IndexingReport {
                documents: 0,
                chunks: 0,
                generation: self.index_generation().await,
            });
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        for document in documents {
            let document = document.normalized();
            let mut produced = self.chunker.chunk(&document).await.map_err(|e| {
                error!(source_id = %document.source_id, error = %e, "chunking failed");
                e
            })?;
            debug!(source_id = %document.source_id, chunk_count = produced.len(), "document chunked");
            chunks.append(&mut produced);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            let vectors = self.embedding_provider.embed(&texts).await.map_err(|e| {
                error!(chunk_count = texts.len(), error = %e, "embedding failed during indexing");
                e
            })?;
            check_embeddings(self.embedding_provider.as_ref(), texts.len(), &vectors)?;
            vectors
        };

        let chunk_count = chunks.len();
        let dimensions = self.embedding_provider.dimensions();
        let mut index = InMemoryVectorIndex::new(dimensions);
        index.insert_all(chunks, vectors)?;

        let generation = {
            let mut slot = self.index.write().await;
            // numbered under the lock so the newest install always has the highest generation
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *slot = Some(IndexSnapshot { generation, index: Arc::new(index) });
            generation
        };

        info!(
            document_count = documents.len(),
            chunk_count,
            generation,
            dimensions,
            chunker = %self.chunker.strategy(),
            "index built"
        );
        Ok(IndexingReport { documents: documents.len(), chunks: chunk_count, generation: Some(generation) })
    }

    /// Run the ensemble retrievers for `question` and return the fused results.
    ///
    /// Returns an empty list when no index has been built.
    ///
    /// # Errors
    ///
    /// Returns a [`RagError::ConfigError`] for invalid configuration, or the
    /// last strategy error when every strategy failed.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<FusedResult>> {
        let index = self.index.read().await.as_ref().map(|s| s.index.clone());
        let Some(index) = index else {
            info!("no index built yet, nothing to retrieve");
            return Ok(Vec::new());
        };

        EnsembleRetriever::from_config(
            &self.config,
            index,
            self.embedding_provider.clone(),
            self.generative_provider.clone(),
        )?
        .retrieve(question)
        .await
    }

    /// Answer `question` from the indexed documents and the conversation so far.
    ///
    /// The question and the reply are both appended to the conversation
    /// memory. When retrieval yields nothing, or retrieval or synthesis fails
    /// at the provider, the reply is [`INSUFFICIENT_INFORMATION`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] only; provider failures become an
    /// insufficient-information answer. The conversation still records
    /// [`INSUFFICIENT_INFORMATION`] as the reply, so every question in the
    /// memory is followed by an answer.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        self.memory.lock().await.add_user_message(question);

        let outcome = self.answer(question).await;
        let reply = match &outcome {
            Ok(answer) => answer.text.clone(),
            Err(e) => {
                error!(error = %e, "question could not be answered");
                INSUFFICIENT_INFORMATION.to_string()
            }
        };
        self.memory.lock().await.add_assistant_message(reply);
        outcome
    }

    /// Retrieve and synthesize; the question is already in the memory.
    async fn answer(&self, question: &str) -> Result<Answer> {
        let fused = match self.retrieve(question).await {
            Ok(fused) => fused,
            Err(e) if e.is_config() => return Err(e),
            Err(e) => {
                warn!(error = %e, "retrieval failed, answering without evidence");
                Vec::new()
            }
        };

        let context = FusedContext::new(fused, &self.config.context_separator);
        let answer = if context.is_empty() {
            info!("no evidence retrieved");
            Answer::insufficient()
        } else {
            let request = SynthesisRequest {
                fused_context: context.text,
                conversation_history: self.memory.lock().await.render(),
                question: question.to_string(),
            };
            match self.synthesizer.synthesize(&request).await {
                Ok(text) => Answer { text, status: AnswerStatus::Grounded, sources: context.sources },
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "answer synthesis failed");
                    Answer::insufficient()
                }
            }
        };

        info!(status = ?answer.status, source_count = answer.sources.len(), "question answered");
        Ok(answer)
    }

    /// Clear the conversation memory. The index is kept.
    pub async fn reset(&self) {
        self.memory.lock().await.clear();
        info!("conversation reset");
    }

    /// The conversation so far, oldest message first.
    pub async fn history(&self) -> Vec<Message> {
        self.memory.lock().await.messages().to_vec()
    }
}

/// Builder for constructing a [`Session`].
///
/// The embedding and generative providers are required. The configuration
/// defaults to [`RagConfig::default`], the chunker to the one named by
/// `config.chunking`, and the synthesizer to a [`PromptSynthesizer`] over the
/// generative provider.
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generative_provider: Option<Arc<dyn GenerativeProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    synthesizer: Option<Arc<dyn AnswerSynthesizer>>,
}

impl SessionBuilder {
    /// Set the session configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generative provider used for paraphrasing and answers.
    pub fn generative_provider(mut self, provider: Arc<dyn GenerativeProvider>) -> Self {
        self.generative_provider = Some(provider);
        self
    }

    /// Override the chunker selected by the configuration.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Override the answer synthesizer.
    pub fn synthesizer(mut self, synthesizer: Arc<dyn AnswerSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Build the [`Session`], validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a provider is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Session> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let generative_provider = self
            .generative_provider
            .ok_or_else(|| RagError::ConfigError("generative_provider is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => config.chunking.build(&config, embedding_provider.clone())?,
        };
        let synthesizer = self
            .synthesizer
            .unwrap_or_else(|| Arc::new(PromptSynthesizer::new(generative_provider.clone())));

        Ok(Session {
            config,
            embedding_provider,
            generative_provider,
            chunker,
            synthesizer,
            index: RwLock::new(None),
            generation: AtomicU64::new(0),
            memory: Mutex::new(ConversationMemory::new()),
        })
    }
}
