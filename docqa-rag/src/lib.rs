//! Retrieval pipeline for question answering over a user's documents.
//!
//! This crate provides:
//! - Fixed-size, recursive and semantic chunking
//! - An embedding gateway trait with a Gemini REST implementation (`gemini` feature)
//! - An in-memory vector index with similarity and MMR queries
//! - Similarity, MMR and multi-query retrieval strategies
//! - Weighted reciprocal-rank fusion of the strategies' ranked lists
//! - A [`Session`] tying indexing, retrieval, conversation memory and
//!   answer synthesis together
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{Document, RagConfig, Session};
//! use docqa_rag::mock::{MockEmbeddingProvider, MockGenerativeProvider};
//!
//! let session = Session::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(MockEmbeddingProvider::new(64)))
//!     .generative_provider(Arc::new(MockGenerativeProvider::new().with_fallback("...")))
//!     .build()?;
//!
//! session.start(&[Document::new("Rust has no garbage collector.", "notes.txt")]).await?;
//! let answer = session.ask("Does Rust use a garbage collector?").await?;
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod ensemble;
pub mod error;
pub mod fusion;
pub mod generation;
pub mod index;
pub mod memory;
pub mod mock;
pub mod retrieval;
pub mod session;
pub mod synthesis;

#[cfg(feature = "gemini")]
pub mod gemini;

pub use chunking::{Chunker, ChunkingStrategy, FixedSizeChunker, RecursiveChunker, SemanticChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, ChunkKey, Document, FusedResult, IndexEntry, RankedResult, normalize_text};
pub use embedding::{EmbeddingProvider, cosine_similarity};
pub use ensemble::EnsembleRetriever;
pub use error::{RagError, Result};
pub use fusion::{DEFAULT_RRF_CONSTANT, FusionWeights, fuse};
pub use generation::{GenerativeProvider, render_template};
pub use index::{InMemoryVectorIndex, QueryMode};
pub use memory::{ConversationMemory, Message, Role};
pub use retrieval::{
    MmrRetriever, MultiQueryRetriever, RetrievalStrategy, Retriever, SimilarityRetriever,
};
pub use session::{Answer, AnswerStatus, IndexingReport, Session, SessionBuilder};
pub use synthesis::{
    AnswerSynthesizer, FusedContext, INSUFFICIENT_INFORMATION, PromptSynthesizer,
    SynthesisRequest,
};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiEmbeddingProvider, GeminiGenerativeProvider};
