//! Ensemble retrieval: run every strategy and fuse their ranked lists.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::RagConfig;
use crate::document::{FusedResult, RankedResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::fusion::{DEFAULT_RRF_CONSTANT, FusionWeights, fuse};
use crate::generation::GenerativeProvider;
use crate::index::InMemoryVectorIndex;
use crate::retrieval::{
    MmrRetriever, MultiQueryRetriever, RetrievalStrategy, Retriever, SimilarityRetriever,
};

/// Runs several [`Retriever`]s concurrently and fuses their output with
/// weighted reciprocal-rank fusion.
///
/// A strategy that fails is logged and left out of the fusion; its weight
/// is not redistributed. Only when every strategy fails is an error returned.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EnsembleRetriever;
///
/// let ensemble = EnsembleRetriever::from_config(&config, index, embedder, generator)?;
/// let fused = ensemble.retrieve("What does section 2 cover?").await?;
/// ```
pub struct EnsembleRetriever {
    retrievers: Vec<Arc<dyn Retriever>>,
    weights: FusionWeights,
    constant: f64,
}

impl EnsembleRetriever {
    /// Create an ensemble over `retrievers`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if no retriever is given, two
    /// retrievers share a strategy, or a retriever's strategy has no weight.
    pub fn new(retrievers: Vec<Arc<dyn Retriever>>, weights: FusionWeights) -> Result<Self> {
        if retrievers.is_empty() {
            return Err(RagError::ConfigError("ensemble needs at least one retriever".to_string()));
        }
        weights.validate()?;
        let mut strategies: Vec<RetrievalStrategy> =
            retrievers.iter().map(|r| r.strategy()).collect();
        for strategy in &strategies {
            if weights.get(*strategy).is_none() {
                return Err(RagError::ConfigError(format!(
                    "no fusion weight configured for '{strategy}'"
                )));
            }
        }
        strategies.sort();
        if strategies.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(RagError::ConfigError(
                "each retrieval strategy may appear only once in an ensemble".to_string(),
            ));
        }
        Ok(Self { retrievers, weights, constant: DEFAULT_RRF_CONSTANT })
    }

    /// Build the standard similarity + MMR + multi-query ensemble over `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `config` does not validate.
    pub fn from_config(
        config: &RagConfig,
        index: Arc<InMemoryVectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerativeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let mut retrievers: Vec<Arc<dyn Retriever>> = Vec::new();
        for strategy in config.fusion_weights.strategies() {
            let retriever: Arc<dyn Retriever> = match strategy {
                RetrievalStrategy::Similarity => Arc::new(
                    SimilarityRetriever::new(index.clone(), embedder.clone())
                        .with_k(config.top_k),
                ),
                RetrievalStrategy::Mmr => Arc::new(
                    MmrRetriever::new(index.clone(), embedder.clone())
                        .with_k(config.top_k)
                        .with_lambda_mult(config.mmr_lambda)
                        .with_fetch_k(config.mmr_fetch_k),
                ),
                RetrievalStrategy::MultiQuery => Arc::new(
                    MultiQueryRetriever::new(index.clone(), embedder.clone(), generator.clone())
                        .with_k(config.top_k)
                        .with_query_count(config.multi_query_count)
                        .with_max_results(config.multi_query_max_results),
                ),
            };
            retrievers.push(retriever);
        }
        Ok(Self::new(retrievers, config.fusion_weights.clone())?
            .with_constant(config.rrf_constant))
    }

    /// Set the smoothing constant `C`.
    pub fn with_constant(mut self, constant: f64) -> Self {
        self.constant = constant;
        self
    }

    /// Run every strategy for `query` and fuse the results.
    ///
    /// # Errors
    ///
    /// Returns the last strategy error if every strategy failed, or a
    /// [`RagError::ConfigError`] from fusion.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<FusedResult>> {
        let runs = join_all(self.retrievers.iter().map(|retriever| async move {
            (retriever.strategy(), retriever.retrieve(query).await)
        }))
        .await;

        let mut per_strategy: BTreeMap<RetrievalStrategy, Vec<RankedResult>> = BTreeMap::new();
        let mut last_error = None;
        for (strategy, outcome) in runs {
            match outcome {
                Ok(results) => {
                    info!(%strategy, result_count = results.len(), "strategy completed");
                    per_strategy.insert(strategy, results);
                }
                Err(e) => {
                    warn!(%strategy, error = %e, "strategy failed, fusing remaining strategies");
                    last_error = Some(e);
                }
            }
        }

        if per_strategy.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let fused = fuse(&per_strategy, &self.weights, self.constant)?;
        info!(
            strategies = per_strategy.len(),
            result_count = fused.len(),
            "ensemble retrieval completed"
        );
        Ok(fused)
    }
}
