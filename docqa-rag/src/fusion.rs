//! Weighted reciprocal-rank fusion of per-strategy result lists.
//!
//! For every chunk seen by any strategy:
//!
//! ```text
//! fused_score = Σ weight[strategy] / (rank_in_strategy + C)
//! ```
//!
//! A strategy that did not return the chunk contributes nothing. Only ranks
//! enter the formula, so strategies with incomparable score scales can be
//! combined. Output is ordered by descending fused score, then by the best
//! rank the chunk reached in any strategy, then by source and position.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{ChunkKey, FusedResult, RankedResult};
use crate::error::{RagError, Result};
use crate::retrieval::RetrievalStrategy;

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Default smoothing constant `C`.
pub const DEFAULT_RRF_CONSTANT: f64 = 60.0;

/// Per-strategy fusion weights, validated to sum to 1.0.
///
/// Serializes as a map from strategy name to weight, e.g.
/// `{"similarity": 0.3, "mmr": 0.4, "multi_query": 0.3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<RetrievalStrategy, f64>", into = "BTreeMap<RetrievalStrategy, f64>")]
pub struct FusionWeights {
    weights: BTreeMap<RetrievalStrategy, f64>,
}

impl FusionWeights {
    /// Create validated weights.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the map is empty, a weight is
    /// negative or not finite, or the weights do not sum to 1.0 within
    /// [`WEIGHT_SUM_TOLERANCE`].
    pub fn new(weights: BTreeMap<RetrievalStrategy, f64>) -> Result<Self> {
        let weights = Self { weights };
        weights.validate()?;
        Ok(weights)
    }

    /// Create weights from `(strategy, weight)` pairs.
    ///
    /// # Errors
    ///
    /// See [`FusionWeights::new`].
    pub fn from_pairs(pairs: impl IntoIterator<Item = (RetrievalStrategy, f64)>) -> Result<Self> {
        Self::new(pairs.into_iter().collect())
    }

    /// The weight of `strategy`, if it has one.
    pub fn get(&self, strategy: RetrievalStrategy) -> Option<f64> {
        self.weights.get(&strategy).copied()
    }

    /// Strategies that carry a weight, in canonical order.
    pub fn strategies(&self) -> impl Iterator<Item = RetrievalStrategy> + '_ {
        self.weights.keys().copied()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Err(RagError::ConfigError("fusion weights must not be empty".to_string()));
        }
        if let Some((strategy, w)) = self.weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(RagError::ConfigError(format!(
                "fusion weight for '{strategy}' must be a non-negative number, got {w}"
            )));
        }
        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RagError::ConfigError(format!("fusion weights must sum to 1.0, got {sum}")));
        }
        Ok(())
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (RetrievalStrategy::Similarity, 0.30),
            (RetrievalStrategy::Mmr, 0.40),
            (RetrievalStrategy::MultiQuery, 0.30),
        ]);
        Self { weights }
    }
}

impl TryFrom<BTreeMap<RetrievalStrategy, f64>> for FusionWeights {
    type Error = RagError;

    fn try_from(weights: BTreeMap<RetrievalStrategy, f64>) -> Result<Self> {
        Self::new(weights)
    }
}

impl From<FusionWeights> for BTreeMap<RetrievalStrategy, f64> {
    fn from(weights: FusionWeights) -> Self {
        weights.weights
    }
}

/// Running totals for one chunk during fusion.
struct Accumulator {
    result: FusedResult,
    best_rank: usize,
}

/// Fuse per-strategy ranked lists into one deduplicated, ordered list.
///
/// Chunks are identified by [`ChunkKey`]; a chunk returned by several
/// strategies yields one fused entry. If a strategy lists the same chunk
/// more than once, only its best rank counts. All-empty input gives an
/// empty output.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if the weights are invalid, a strategy
/// in `results` has no weight, or `constant` is negative or not finite.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{fuse, FusionWeights};
///
/// let fused = fuse(&per_strategy, &FusionWeights::default(), 60.0)?;
/// ```
pub fn fuse(
    results: &BTreeMap<RetrievalStrategy, Vec<RankedResult>>,
    weights: &FusionWeights,
    constant: f64,
) -> Result<Vec<FusedResult>> {
    weights.validate()?;
    if !constant.is_finite() || constant < 0.0 {
        return Err(RagError::ConfigError(format!(
            "rrf constant ({constant}) must be a non-negative number"
        )));
    }

    let mut totals: HashMap<ChunkKey, Accumulator> = HashMap::new();
    for (strategy, ranked) in results {
        let weight = weights.get(*strategy).ok_or_else(|| {
            RagError::ConfigError(format!("no fusion weight configured for '{strategy}'"))
        })?;

        let mut best_in_list: HashMap<ChunkKey, &RankedResult> = HashMap::new();
        for item in ranked {
            best_in_list
                .entry(item.chunk.key())
                .and_modify(|seen| {
                    if item.rank < seen.rank {
                        *seen = item;
                    }
                })
                .or_insert(item);
        }

        for (key, item) in best_in_list {
            let contribution = weight / (item.rank as f64 + constant);
            totals
                .entry(key)
                .and_modify(|acc| {
                    acc.result.fused_score += contribution;
                    acc.best_rank = acc.best_rank.min(item.rank);
                })
                .or_insert_with(|| Accumulator {
                    result: FusedResult { chunk: item.chunk.clone(), fused_score: contribution },
                    best_rank: item.rank,
                });
        }
    }

    let mut fused: Vec<(ChunkKey, Accumulator)> = totals.into_iter().collect();
    fused.sort_by(|(key_a, a), (key_b, b)| {
        b.result
            .fused_score
            .total_cmp(&a.result.fused_score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| key_a.cmp(key_b))
    });

    debug!(fused = fused.len(), strategies = results.len(), "rank fusion completed");
    Ok(fused.into_iter().map(|(_, acc)| acc.result).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Chunk;

    fn ranked(source: &str, index: usize, rank: usize) -> RankedResult {
        RankedResult {
            chunk: Chunk { text: format!("{source}-{index}"), source_id: source.into(), chunk_index: index },
            score: 1.0 / rank as f32,
            rank,
        }
    }

    #[test]
    fn default_weights_match_ensemble_defaults() {
        let weights = FusionWeights::default();
        assert_eq!(weights.get(RetrievalStrategy::Similarity), Some(0.30));
        assert_eq!(weights.get(RetrievalStrategy::Mmr), Some(0.40));
        assert_eq!(weights.get(RetrievalStrategy::MultiQuery), Some(0.30));
        weights.validate().unwrap();
    }

    #[test]
    fn weights_must_be_non_negative() {
        let err = FusionWeights::from_pairs([
            (RetrievalStrategy::Similarity, 1.5),
            (RetrievalStrategy::Mmr, -0.5),
        ])
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn missing_weight_for_a_strategy_is_a_config_error() {
        let weights = FusionWeights::from_pairs([(RetrievalStrategy::Similarity, 1.0)]).unwrap();
        let results = BTreeMap::from([(RetrievalStrategy::Mmr, vec![ranked("a", 0, 1)])]);
        assert!(fuse(&results, &weights, 60.0).unwrap_err().is_config());
    }

    #[test]
    fn duplicate_within_one_list_counts_once_at_best_rank() {
        let weights = FusionWeights::from_pairs([(RetrievalStrategy::Similarity, 1.0)]).unwrap();
        let results = BTreeMap::from([(
            RetrievalStrategy::Similarity,
            vec![ranked("a", 0, 1), ranked("a", 0, 4)],
        )]);
        let fused = fuse(&results, &weights, 60.0).unwrap();
        assert_eq!(fused.len(), 1);
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn equal_scores_break_ties_by_best_rank_then_source() {
        let weights = FusionWeights::from_pairs([
            (RetrievalStrategy::Similarity, 0.5),
            (RetrievalStrategy::Mmr, 0.5),
        ])
        .unwrap();
        // "b" is rank 1 in similarity, "a" is rank 1 in mmr: same score, same best rank
        let results = BTreeMap::from([
            (RetrievalStrategy::Similarity, vec![ranked("b", 0, 1), ranked("a", 0, 2)]),
            (RetrievalStrategy::Mmr, vec![ranked("a", 0, 1), ranked("b", 0, 2)]),
        ]);
        let fused = fuse(&results, &weights, 60.0).unwrap();
        assert_eq!(fused[0].chunk.source_id, "a");
        assert_eq!(fused[1].chunk.source_id, "b");
    }
}
