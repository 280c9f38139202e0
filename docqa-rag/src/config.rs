//! Configuration for the retrieval pipeline.

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingStrategy;
use crate::error::{RagError, Result};
use crate::fusion::FusionWeights;

/// Configuration parameters for chunking, retrieval and fusion.
///
/// Deserializes from JSON with every field optional; missing fields take the
/// [`Default`] values. Call [`RagConfig::validate`] (or build through
/// [`RagConfig::builder`]) before use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Which chunker splits documents at indexing time.
    pub chunking: ChunkingStrategy,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// `k` in the semantic chunker's `mean + k * stddev` breakpoint threshold.
    pub semantic_threshold: f32,
    /// Neighbouring sentences embedded with each sentence by the semantic chunker.
    pub semantic_buffer_size: usize,
    /// Results returned by each retrieval strategy.
    pub top_k: usize,
    /// MMR relevance/diversity trade-off; lower values favour diversity.
    pub mmr_lambda: f32,
    /// Most-similar candidates MMR re-ranks from.
    pub mmr_fetch_k: usize,
    /// Paraphrases requested by the multi-query strategy.
    pub multi_query_count: usize,
    /// Upper bound on the multi-query strategy's merged result list.
    pub multi_query_max_results: usize,
    /// Per-strategy weights for rank fusion; must sum to 1.0.
    pub fusion_weights: FusionWeights,
    /// Smoothing constant `C` in `weight / (rank + C)`.
    pub rrf_constant: f64,
    /// Separator placed between chunk texts in the fused context.
    pub context_separator: String,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Generative model identifier (paraphrasing and answer synthesis).
    pub generation_model: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingStrategy::FixedSize,
            chunk_size: 1500,
            chunk_overlap: 200,
            semantic_threshold: 1.0,
            semantic_buffer_size: 1,
            top_k: 5,
            mmr_lambda: 0.2,
            mmr_fetch_k: 20,
            multi_query_count: 3,
            multi_query_max_results: 10,
            fusion_weights: FusionWeights::default(),
            rrf_constant: 60.0,
            context_separator: "\n\n".to_string(),
            embedding_model: "models/embedding-001".to_string(),
            generation_model: "gemini-2.0-flash".to_string(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Parse a JSON configuration and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for malformed JSON, unknown strategy
    /// names, or any violation reported by [`validate`](RagConfig::validate).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RagConfig = serde_json::from_str(json)
            .map_err(|e| RagError::ConfigError(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `mmr_lambda` is outside `[0, 1]`
    /// - `mmr_fetch_k < top_k`
    /// - `multi_query_count == 0` or `multi_query_max_results == 0`
    /// - `rrf_constant` is negative or not finite
    /// - the fusion weights do not sum to 1.0
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(RagError::ConfigError(format!(
                "mmr_lambda ({}) must be within [0, 1]",
                self.mmr_lambda
            )));
        }
        if self.mmr_fetch_k < self.top_k {
            return Err(RagError::ConfigError(format!(
                "mmr_fetch_k ({}) must be at least top_k ({})",
                self.mmr_fetch_k, self.top_k
            )));
        }
        if self.multi_query_count == 0 {
            return Err(RagError::ConfigError(
                "multi_query_count must be greater than zero".to_string(),
            ));
        }
        if self.multi_query_max_results == 0 {
            return Err(RagError::ConfigError(
                "multi_query_max_results must be greater than zero".to_string(),
            ));
        }
        if !self.rrf_constant.is_finite() || self.rrf_constant < 0.0 {
            return Err(RagError::ConfigError(format!(
                "rrf_constant ({}) must be a non-negative number",
                self.rrf_constant
            )));
        }
        self.fusion_weights.validate()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the semantic chunker's breakpoint multiplier.
    pub fn semantic_threshold(mut self, k: f32) -> Self {
        self.config.semantic_threshold = k;
        self
    }

    /// Set how many neighbouring sentences are embedded with each sentence.
    pub fn semantic_buffer_size(mut self, size: usize) -> Self {
        self.config.semantic_buffer_size = size;
        self
    }

    /// Set the number of results each strategy returns.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the MMR relevance/diversity trade-off.
    pub fn mmr_lambda(mut self, lambda: f32) -> Self {
        self.config.mmr_lambda = lambda;
        self
    }

    /// Set the MMR candidate pool size.
    pub fn mmr_fetch_k(mut self, fetch_k: usize) -> Self {
        self.config.mmr_fetch_k = fetch_k;
        self
    }

    /// Set how many paraphrases the multi-query strategy requests.
    pub fn multi_query_count(mut self, count: usize) -> Self {
        self.config.multi_query_count = count;
        self
    }

    /// Cap the merged multi-query result list.
    pub fn multi_query_max_results(mut self, max: usize) -> Self {
        self.config.multi_query_max_results = max;
        self
    }

    /// Set the fusion weights.
    pub fn fusion_weights(mut self, weights: FusionWeights) -> Self {
        self.config.fusion_weights = weights;
        self
    }

    /// Set the reciprocal-rank smoothing constant.
    pub fn rrf_constant(mut self, constant: f64) -> Self {
        self.config.rrf_constant = constant;
        self
    }

    /// Set the embedding model identifier.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Set the generative model identifier.
    pub fn generation_model(mut self, model: impl Into<String>) -> Self {
        self.config.generation_model = model.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
