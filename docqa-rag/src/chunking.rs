//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations:
//!
//! - [`FixedSizeChunker`]: slides a fixed-size character window with overlap
//! - [`RecursiveChunker`]: splits by paragraphs, lines, words, then characters
//!   and merges the pieces back up to the chunk size
//! - [`SemanticChunker`]: embeds sentences and cuts where consecutive
//!   sentences drift apart
//!
//! All sizes are measured in characters, not bytes. Chunkers expect text that
//! has already been passed through [`normalize_text`](crate::normalize_text).

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::embedding::{EmbeddingProvider, check_embeddings, cosine_similarity};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text. Chunk indices
    /// start at zero for every document.
    async fn chunk(&self, document: &Document) -> Result<Vec<Chunk>>;

    /// The strategy this chunker implements.
    fn strategy(&self) -> ChunkingStrategy;
}

/// The available chunking strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Fixed-size character windows.
    #[default]
    FixedSize,
    /// Separator-aware recursive splitting.
    Recursive,
    /// Embedding-driven semantic boundaries.
    Semantic,
}

impl ChunkingStrategy {
    /// The canonical configuration name of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedSize => "fixed_size",
            Self::Recursive => "recursive",
            Self::Semantic => "semantic",
        }
    }

    /// Build the chunker for this strategy from a validated configuration.
    ///
    /// The embedding provider is only used by [`ChunkingStrategy::Semantic`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the chunk size or overlap is invalid.
    pub fn build(
        self,
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn Chunker>> {
        Ok(match self {
            Self::FixedSize => {
                Arc::new(FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?)
            }
            Self::Recursive => {
                Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap)?)
            }
            Self::Semantic => Arc::new(
                SemanticChunker::new(embedder)
                    .with_threshold(config.semantic_threshold)
                    .with_buffer_size(config.semantic_buffer_size),
            ),
        })
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "fixed_size" | "fixed" | "FixedChunker" => Ok(Self::FixedSize),
            "recursive" | "RecursiveCharacterTextSplitter" => Ok(Self::Recursive),
            "semantic" | "SemanticChunker" => Ok(Self::Semantic),
            other => Err(RagError::ConfigError(format!("unknown chunking strategy '{other}'"))),
        }
    }
}

fn validate_sizes(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::ConfigError(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Splits text into fixed-size character windows with configurable overlap.
///
/// Consecutive chunks share exactly `chunk_overlap` characters; the last
/// chunk may be shorter than `chunk_size`.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(1500, 200)?;
/// for chunk in chunker.split(&document) {
///     println!("{} {}", chunk.chunk_index, chunk.text.len());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Lazily split a document.
    ///
    /// The returned iterator is finite and can be cloned to restart it.
    pub fn split<'a>(&self, document: &'a Document) -> FixedSizeChunks<'a> {
        FixedSizeChunks {
            text: &document.text,
            source_id: &document.source_id,
            chunk_size: self.chunk_size,
            step: self.chunk_size - self.chunk_overlap,
            start: if document.text.is_empty() { None } else { Some(0) },
            chunk_index: 0,
        }
    }
}

#[async_trait]
impl Chunker for FixedSizeChunker {
    async fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        Ok(self.split(document).collect())
    }

    fn strategy(&self) -> ChunkingStrategy {
        ChunkingStrategy::FixedSize
    }
}

/// Iterator over the fixed-size windows of one document.
#[derive(Debug, Clone)]
pub struct FixedSizeChunks<'a> {
    text: &'a str,
    source_id: &'a str,
    chunk_size: usize,
    step: usize,
    /// Byte offset of the next window, `None` once the end has been emitted.
    start: Option<usize>,
    chunk_index: usize,
}

impl Iterator for FixedSizeChunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.start?;
        let rest = &self.text[start..];
        let end = rest.char_indices().nth(self.chunk_size).map_or(self.text.len(), |(i, _)| start + i);

        let chunk = Chunk {
            text: self.text[start..end].to_string(),
            source_id: self.source_id.to_string(),
            chunk_index: self.chunk_index,
        };
        self.chunk_index += 1;
        self.start = if end == self.text.len() {
            None
        } else {
            rest.char_indices().nth(self.step).map(|(i, _)| start + i)
        };
        Some(chunk)
    }
}

/// Separators tried in order by [`RecursiveChunker`]; the empty separator
/// splits into single characters.
const RECURSIVE_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text hierarchically: paragraphs → lines → words → characters.
///
/// Text is split on the first separator that occurs in it. Pieces that are
/// still too long are split with the next separator; short pieces are merged
/// back together up to `chunk_size`, carrying up to `chunk_overlap`
/// characters of trailing pieces into the next chunk. Chunks are trimmed of
/// surrounding whitespace.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_sizes(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    fn split_text(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
        } else {
            split_keeping_separator(text, separator)
        };

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short));
                short.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.trim().to_string());
            } else {
                chunks.extend(self.split_text(piece, remaining));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge(&short));
        }
        chunks.retain(|c| !c.is_empty());
        chunks
    }

    /// Merge short pieces into chunks of at most `chunk_size` characters.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                let text = window.concat();
                if !text.trim().is_empty() {
                    merged.push(text.trim().to_string());
                }
                while !window.is_empty()
                    && (total > self.chunk_overlap || total + len > self.chunk_size)
                {
                    total -= char_len(window[0]);
                    window.remove(0);
                }
            }
            window.push(piece);
            total += len;
        }

        let text = window.concat();
        if !text.trim().is_empty() {
            merged.push(text.trim().to_string());
        }
        merged
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[async_trait]
impl Chunker for RecursiveChunker {
    async fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.text.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .split_text(&document.text, &RECURSIVE_SEPARATORS)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                text,
                source_id: document.source_id.clone(),
                chunk_index,
            })
            .collect())
    }

    fn strategy(&self) -> ChunkingStrategy {
        ChunkingStrategy::Recursive
    }
}

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.?!]\s+").expect("unreachable error: sentence pattern is valid")
});

/// Split text into sentences after `.`, `?` or `!` followed by whitespace.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        sentences.push(text[start..m.start() + 1].trim());
        start = m.end();
    }
    sentences.push(text[start..].trim());
    sentences.retain(|s| !s.is_empty());
    sentences
}

/// Splits text where the meaning shifts between consecutive sentences.
///
/// Each sentence is embedded together with `buffer_size` neighbours on each
/// side. A boundary is placed after sentence `i` when the cosine distance
/// between windows `i` and `i + 1` exceeds `mean + threshold * stddev` of all
/// consecutive distances in the document. One embedding call is made per
/// document, covering every sentence window.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::SemanticChunker;
///
/// let chunker = SemanticChunker::new(embedder).with_threshold(1.0);
/// let chunks = chunker.chunk(&document).await?;
/// ```
pub struct SemanticChunker {
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f32,
    buffer_size: usize,
}

impl SemanticChunker {
    /// Create a semantic chunker with threshold `1.0` and buffer size `1`.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, threshold: 1.0, buffer_size: 1 }
    }

    /// Set `k` in the `mean + k * stddev` breakpoint threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the number of neighbouring sentences embedded with each sentence.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    fn windows(&self, sentences: &[&str]) -> Vec<String> {
        (0..sentences.len())
            .map(|i| {
                let lo = i.saturating_sub(self.buffer_size);
                let hi = (i + self.buffer_size + 1).min(sentences.len());
                sentences[lo..hi].join(" ")
            })
            .collect()
    }
}

/// Indices `i` after which a new chunk starts, given consecutive distances.
pub(crate) fn breakpoints(distances: &[f32], threshold: f32) -> Vec<usize> {
    if distances.is_empty() {
        return Vec::new();
    }
    let n = distances.len() as f32;
    let mean = distances.iter().sum::<f32>() / n;
    let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n;
    let cutoff = mean + threshold * variance.sqrt();
    distances.iter().enumerate().filter(|(_, d)| **d > cutoff).map(|(i, _)| i).collect()
}

#[async_trait]
impl Chunker for SemanticChunker {
    async fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        let sentences = split_sentences(&document.text);
        let make = |chunk_index: usize, text: String| Chunk {
            text,
            source_id: document.source_id.clone(),
            chunk_index,
        };
        if sentences.len() <= 1 {
            return Ok(sentences.into_iter().map(|s| make(0, s.to_string())).collect());
        }

        let windows = self.windows(&sentences);
        let inputs: Vec<&str> = windows.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&inputs).await?;
        check_embeddings(self.embedder.as_ref(), inputs.len(), &vectors)?;

        let distances: Vec<f32> =
            vectors.windows(2).map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1])).collect();
        let cuts = breakpoints(&distances, self.threshold);
        debug!(
            source = %document.source_id,
            sentences = sentences.len(),
            boundaries = cuts.len(),
            "semantic boundaries detected"
        );

        let mut chunks = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;
        for cut in cuts {
            chunks.push(make(chunks.len(), sentences[start..=cut].join(" ")));
            start = cut + 1;
        }
        if start < sentences.len() {
            chunks.push(make(chunks.len(), sentences[start..].join(" ")));
        }
        Ok(chunks)
    }

    fn strategy(&self) -> ChunkingStrategy {
        ChunkingStrategy::Semantic
    }
}
