//! In-memory vector index with similarity and MMR queries.
//!
//! This module provides [`InMemoryVectorIndex`], a flat index that scores
//! every entry by cosine similarity. One index corresponds to one indexing
//! session: it is built once with [`insert_all`](InMemoryVectorIndex::insert_all),
//! shared read-only behind an `Arc`, and replaced wholesale on the next build.

use tracing::debug;
use uuid::Uuid;

use crate::document::{Chunk, IndexEntry, cmp_score_desc};
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};

/// How [`InMemoryVectorIndex::query`] selects results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryMode {
    /// The `k` most similar entries, ties broken by insertion order.
    Similarity,
    /// Maximal marginal relevance over the `fetch_k` most similar entries.
    Mmr {
        /// Relevance/diversity trade-off in `[0, 1]`; lower favours diversity.
        lambda_mult: f32,
        /// Size of the candidate pool re-ranked by MMR.
        fetch_k: usize,
    },
}

impl QueryMode {
    /// MMR with the default candidate pool of 20.
    pub fn mmr(lambda_mult: f32) -> Self {
        Self::Mmr { lambda_mult, fetch_k: 20 }
    }
}

/// A flat in-memory vector index.
///
/// Entries keep their insertion order, which is the final tie-breaker for
/// equal scores. All vectors share the dimensionality fixed at construction.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{InMemoryVectorIndex, QueryMode};
///
/// let mut index = InMemoryVectorIndex::new(768);
/// index.insert_all(chunks, vectors)?;
/// let hits = index.query(&query_vector, 5, QueryMode::mmr(0.2))?;
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryVectorIndex {
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl InMemoryVectorIndex {
    /// Create an empty index for vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, entries: Vec::new() }
    }

    /// The dimensionality every stored vector has.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stored entries in insertion order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Bulk-load chunks with their vectors.
    ///
    /// Either every pair is inserted or none is.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the counts differ or any vector
    /// does not have the index's dimensionality.
    pub fn insert_all(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(RagError::ConfigError(format!(
                "cannot index {} chunks with {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(RagError::ConfigError(format!(
                "vector dimension mismatch: index has {}, received {}",
                self.dimensions,
                bad.len()
            )));
        }

        self.entries.reserve(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            self.entries.push(IndexEntry { id: Uuid::new_v4().to_string(), vector, chunk });
        }
        debug!(entries = self.entries.len(), dimensions = self.dimensions, "index loaded");
        Ok(())
    }

    /// Return up to `k` chunks for `vector`, each with its cosine similarity
    /// to the query.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the query vector has the wrong
    /// dimensionality or the MMR parameters are out of range.
    pub fn query(&self, vector: &[f32], k: usize, mode: QueryMode) -> Result<Vec<(Chunk, f32)>> {
        if vector.len() != self.dimensions {
            return Err(RagError::ConfigError(format!(
                "query dimension mismatch: index has {}, received {}",
                self.dimensions,
                vector.len()
            )));
        }

        let picked = match mode {
            QueryMode::Similarity => self.most_similar(vector, k),
            QueryMode::Mmr { lambda_mult, fetch_k } => {
                if !(0.0..=1.0).contains(&lambda_mult) {
                    return Err(RagError::ConfigError(format!(
                        "lambda_mult ({lambda_mult}) must be within [0, 1]"
                    )));
                }
                self.max_marginal_relevance(vector, k, fetch_k.max(k), lambda_mult)
            }
        };

        Ok(picked.into_iter().map(|(i, score)| (self.entries[i].chunk.clone(), score)).collect())
    }

    /// Entry positions and scores of the `k` most similar entries.
    fn most_similar(&self, vector: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(&entry.vector, vector)))
            .collect();
        // stable sort: equal scores keep insertion order
        scored.sort_by(|a, b| cmp_score_desc(a.1, b.1));
        scored.truncate(k);
        scored
    }

    /// Greedy MMR selection, starting from the most similar candidate.
    ///
    /// Each step picks the candidate maximising
    /// `lambda * sim(query, c) - (1 - lambda) * max(sim(c, selected))`.
    /// Ties go to the candidate ranked higher by plain similarity.
    fn max_marginal_relevance(
        &self,
        vector: &[f32],
        k: usize,
        fetch_k: usize,
        lambda_mult: f32,
    ) -> Vec<(usize, f32)> {
        let candidates = self.most_similar(vector, fetch_k);
        let target = k.min(candidates.len());
        let mut selected: Vec<usize> = Vec::with_capacity(target);
        if target == 0 {
            return Vec::new();
        }
        selected.push(0);

        while selected.len() < target {
            let mut best: Option<(usize, f32)> = None;
            for (pos, (entry, relevance)) in candidates.iter().enumerate() {
                if selected.contains(&pos) {
                    continue;
                }
                let redundancy = selected
                    .iter()
                    .map(|&s| {
                        cosine_similarity(
                            &self.entries[*entry].vector,
                            &self.entries[candidates[s].0].vector,
                        )
                    })
                    .fold(f32::NEG_INFINITY, f32::max);
                let score = lambda_mult * relevance - (1.0 - lambda_mult) * redundancy;
                if best.is_none_or(|(_, top)| score > top) {
                    best = Some((pos, score));
                }
            }
            match best {
                Some((pos, _)) => selected.push(pos),
                None => break,
            }
        }

        selected.into_iter().map(|pos| candidates[pos]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(i: usize) -> Chunk {
        Chunk { text: format!("chunk {i}"), source_id: "doc".into(), chunk_index: i }
    }

    #[test]
    fn insert_is_all_or_nothing_on_dimension_mismatch() {
        let mut index = InMemoryVectorIndex::new(2);
        let err = index
            .insert_all(vec![chunk(0), chunk(1)], vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]])
            .unwrap_err();
        assert!(err.is_config());
        assert!(index.is_empty());
    }

    #[test]
    fn insert_generates_unique_ids() {
        let mut index = InMemoryVectorIndex::new(2);
        index.insert_all(vec![chunk(0), chunk(1)], vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_ne!(index.entries()[0].id, index.entries()[1].id);
    }

    #[test]
    fn similarity_ties_follow_insertion_order() {
        let mut index = InMemoryVectorIndex::new(2);
        index
            .insert_all(
                vec![chunk(0), chunk(1), chunk(2)],
                vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 0.0]],
            )
            .unwrap();
        let hits = index.query(&[1.0, 0.0], 2, QueryMode::Similarity).unwrap();
        let order: Vec<usize> = hits.iter().map(|(c, _)| c.chunk_index).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn query_rejects_wrong_dimension_and_bad_lambda() {
        let index = InMemoryVectorIndex::new(3);
        assert!(index.query(&[1.0], 1, QueryMode::Similarity).unwrap_err().is_config());
        assert!(index.query(&[1.0, 0.0, 0.0], 1, QueryMode::mmr(2.0)).unwrap_err().is_config());
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = InMemoryVectorIndex::new(2);
        assert!(index.query(&[1.0, 0.0], 5, QueryMode::mmr(0.2)).unwrap().is_empty());
    }
}
