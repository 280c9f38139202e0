//! Data types for documents, chunks, index entries and retrieval results.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Page separator recognised by [`Document::from_source`].
const PAGE_BREAK: char = '\u{000C}';

/// A unit of source text, one per uploaded page or logical unit.
///
/// Documents are consumed by a [`Chunker`](crate::Chunker) and are not
/// retained once indexing finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// The text content of the document.
    pub text: String,
    /// Name of the source the text came from (typically a file name).
    pub source_id: String,
}

impl Document {
    /// Create a document from already extracted text.
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self { text: text.into(), source_id: source_id.into() }
    }

    /// Build documents from raw source bytes.
    ///
    /// Bytes are decoded as UTF-8 (invalid sequences are replaced) and split
    /// on form-feed page breaks. Every non-blank page becomes one document
    /// tagged with `source_name`.
    pub fn from_source(raw: &[u8], source_name: &str) -> Vec<Document> {
        String::from_utf8_lossy(raw)
            .split(PAGE_BREAK)
            .filter(|page| !page.trim().is_empty())
            .map(|page| Document::new(page, source_name))
            .collect()
    }

    /// Return a copy of this document with [`normalize_text`] applied.
    pub fn normalized(&self) -> Document {
        Document { text: normalize_text(&self.text), source_id: self.source_id.clone() }
    }
}

/// Replace line breaks with single spaces.
///
/// Chunkers expect normalized text; this is applied by the caller before
/// chunking.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// A bounded segment of a [`Document`]'s text, the unit of indexing and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// The text content of the chunk.
    pub text: String,
    /// The `source_id` of the parent document.
    pub source_id: String,
    /// Zero-based position of this chunk within its document.
    pub chunk_index: usize,
}

impl Chunk {
    /// The identity used to deduplicate chunks across retrieval results.
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            source_id: self.source_id.clone(),
            chunk_index: self.chunk_index,
            text: self.text.clone(),
        }
    }
}

/// Chunk identity: same source, same position, same text.
///
/// Ordering is by source, then position, then text, which gives fusion a
/// total tie-break order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub source_id: String,
    pub chunk_index: usize,
    pub text: String,
}

/// A stored chunk together with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// Unique identifier generated at insert time.
    pub id: String,
    /// The embedding of `chunk.text`.
    pub vector: Vec<f32>,
    /// The indexed chunk.
    pub chunk: Chunk,
}

/// One result of a single retrieval strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
    /// 1-based position within the strategy's list.
    pub rank: usize,
}

impl RankedResult {
    /// Assign 1-based ranks to an ordered list of `(chunk, score)` pairs.
    pub fn from_scored(scored: Vec<(Chunk, f32)>) -> Vec<RankedResult> {
        scored
            .into_iter()
            .enumerate()
            .map(|(i, (chunk, score))| RankedResult { chunk, score, rank: i + 1 })
            .collect()
    }
}

/// A deduplicated result of rank fusion across strategies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Weighted reciprocal-rank score (higher is more relevant).
    pub fused_score: f64,
}

/// Descending comparison for similarity scores; NaN sorts last.
pub(crate) fn cmp_score_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}
