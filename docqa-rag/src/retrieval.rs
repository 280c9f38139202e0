//! Retrieval strategies over a shared [`InMemoryVectorIndex`].
//!
//! - [`SimilarityRetriever`]: top-k by cosine similarity
//! - [`MmrRetriever`]: diversity-aware maximal marginal relevance
//! - [`MultiQueryRetriever`]: paraphrases the question with a generative
//!   model and unions the similarity results of every variant
//!
//! Every strategy embeds the query itself and only reads the index, so the
//! three can run concurrently against the same `Arc`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{Chunk, RankedResult, cmp_score_desc};
use crate::embedding::{EmbeddingProvider, check_embeddings};
use crate::error::{RagError, Result};
use crate::generation::GenerativeProvider;
use crate::index::{InMemoryVectorIndex, QueryMode};

/// Default number of results per strategy.
pub const DEFAULT_TOP_K: usize = 5;

/// Default MMR relevance/diversity trade-off.
pub const DEFAULT_MMR_LAMBDA: f32 = 0.2;

/// The available retrieval strategies.
///
/// Ordering is the canonical order used when strategies are listed or fused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Pure similarity search.
    Similarity,
    /// Maximal marginal relevance.
    Mmr,
    /// Query expansion through paraphrases.
    MultiQuery,
}

impl RetrievalStrategy {
    /// All strategies in canonical order.
    pub const ALL: [RetrievalStrategy; 3] = [Self::Similarity, Self::Mmr, Self::MultiQuery];

    /// The canonical configuration name of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Mmr => "mmr",
            Self::MultiQuery => "multi_query",
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "similarity" => Ok(Self::Similarity),
            "mmr" => Ok(Self::Mmr),
            "multi_query" | "multiquery" => Ok(Self::MultiQuery),
            other => Err(RagError::ConfigError(format!("unknown retrieval strategy '{other}'"))),
        }
    }
}

/// A retrieval policy producing a ranked list for a question.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve chunks for `query`, best first, with 1-based ranks.
    ///
    /// The order is deterministic for a given index and query.
    async fn retrieve(&self, query: &str) -> Result<Vec<RankedResult>>;

    /// The strategy this retriever implements.
    fn strategy(&self) -> RetrievalStrategy;
}

/// Top-k retrieval by cosine similarity.
pub struct SimilarityRetriever {
    index: Arc<InMemoryVectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    k: usize,
}

impl SimilarityRetriever {
    /// Create a similarity retriever returning [`DEFAULT_TOP_K`] results.
    pub fn new(index: Arc<InMemoryVectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder, k: DEFAULT_TOP_K }
    }

    /// Set the number of results.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

#[async_trait]
impl Retriever for SimilarityRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RankedResult>> {
        let vector = self.embedder.embed_one(query).await?;
        let hits = self.index.query(&vector, self.k, QueryMode::Similarity)?;
        Ok(RankedResult::from_scored(hits))
    }

    fn strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::Similarity
    }
}

/// Diversity-aware retrieval with maximal marginal relevance.
pub struct MmrRetriever {
    index: Arc<InMemoryVectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    k: usize,
    lambda_mult: f32,
    fetch_k: usize,
}

impl MmrRetriever {
    /// Create an MMR retriever with `k = 5`, `lambda_mult = 0.2`, `fetch_k = 20`.
    pub fn new(index: Arc<InMemoryVectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder, k: DEFAULT_TOP_K, lambda_mult: DEFAULT_MMR_LAMBDA, fetch_k: 20 }
    }

    /// Set the number of results.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Set the relevance/diversity trade-off.
    pub fn with_lambda_mult(mut self, lambda_mult: f32) -> Self {
        self.lambda_mult = lambda_mult;
        self
    }

    /// Set the candidate pool size.
    pub fn with_fetch_k(mut self, fetch_k: usize) -> Self {
        self.fetch_k = fetch_k;
        self
    }
}

#[async_trait]
impl Retriever for MmrRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RankedResult>> {
        let vector = self.embedder.embed_one(query).await?;
        let mode = QueryMode::Mmr { lambda_mult: self.lambda_mult, fetch_k: self.fetch_k };
        let hits = self.index.query(&vector, self.k, mode)?;
        Ok(RankedResult::from_scored(hits))
    }

    fn strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::Mmr
    }
}

const PARAPHRASE_TEMPLATE: &str = "You are an AI language model assistant. Write {count} \
different versions of the user question below so that documents can be retrieved from a \
vector database from several perspectives, working around the limits of distance-based \
similarity search. Reply with one alternative question per line and nothing else.\n\
Original question: {question}";

/// Query-expansion retrieval.
///
/// Asks a generative model for `query_count` paraphrases, runs similarity
/// search for the original question and every paraphrase, and merges the
/// hits. A chunk found by several variants keeps its highest similarity.
/// The merged list is re-ranked by that score and capped at `max_results`.
pub struct MultiQueryRetriever {
    index: Arc<InMemoryVectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerativeProvider>,
    k: usize,
    query_count: usize,
    max_results: usize,
}

impl MultiQueryRetriever {
    /// Create a multi-query retriever with `k = 5`, three paraphrases and at
    /// most ten merged results.
    pub fn new(
        index: Arc<InMemoryVectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerativeProvider>,
    ) -> Self {
        Self { index, embedder, generator, k: DEFAULT_TOP_K, query_count: 3, max_results: 10 }
    }

    /// Set the number of results per query variant.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Set how many paraphrases are requested (at least one).
    pub fn with_query_count(mut self, count: usize) -> Self {
        self.query_count = count.max(1);
        self
    }

    /// Cap the merged result list.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// The original question followed by its paraphrases.
    async fn query_variants(&self, query: &str) -> Result<Vec<String>> {
        let variables = BTreeMap::from([
            ("count", self.query_count.to_string()),
            ("question", query.to_string()),
        ]);
        let response = self.generator.generate(PARAPHRASE_TEMPLATE, &variables).await?;
        let mut variants = vec![query.to_string()];
        variants.extend(parse_paraphrases(&response, query, self.query_count));
        debug!(variants = variants.len(), "query expanded");
        Ok(variants)
    }
}

/// Extract up to `limit` distinct paraphrases from a line-per-question reply.
///
/// List markers such as `1.`, `2)`, `-` and `*` are stripped; blank lines
/// and restatements of the original question are dropped.
pub(crate) fn parse_paraphrases(response: &str, original: &str, limit: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::from([original.trim().to_lowercase()]);
    response
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_lowercase()))
        .take(limit)
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim();
        }
    }
    line
}

#[async_trait]
impl Retriever for MultiQueryRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RankedResult>> {
        let variants = self.query_variants(query).await?;
        let inputs: Vec<&str> = variants.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&inputs).await?;
        check_embeddings(self.embedder.as_ref(), inputs.len(), &vectors)?;

        let mut hits: Vec<(Chunk, f32)> = Vec::new();
        for vector in &vectors {
            hits.extend(self.index.query(vector, self.k, QueryMode::Similarity)?);
        }

        // best score first, then a fixed chunk order, so merging never
        // depends on which variant answered first
        hits.sort_by(|(a, sa), (b, sb)| {
            cmp_score_desc(*sa, *sb)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
                .then_with(|| a.text.cmp(&b.text))
        });
        let mut seen = HashSet::new();
        hits.retain(|(chunk, _)| seen.insert(chunk.key()));
        hits.truncate(self.max_results);

        Ok(RankedResult::from_scored(hits))
    }

    fn strategy(&self) -> RetrievalStrategy {
        RetrievalStrategy::MultiQuery
    }
}
