//! Embedding gateway: converts text into fixed-dimensionality vectors.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Every call is an independent remote request: implementations must not
/// cache results or hold per-call mutable state, so a single provider can be
/// shared across concurrently running retrieval strategies. Failures surface
/// as [`RagError::ServiceError`] and are never retried here.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EmbeddingProvider;
///
/// let vectors = provider.embed(&["first passage", "second passage"]).await?;
/// let query = provider.embed_one("what is in the report?").await?;
/// assert_eq!(query.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per input text, in input order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a single text.
    ///
    /// The default implementation delegates to [`embed`](EmbeddingProvider::embed).
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text]).await?.into_iter().next().ok_or_else(|| {
            RagError::service(self.model(), "provider returned no embedding for the input")
        })
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Return the model identifier this provider embeds with.
    fn model(&self) -> &str;
}

/// Check that a provider answered with one vector of the expected size per input.
pub(crate) fn check_embeddings(
    provider: &dyn EmbeddingProvider,
    inputs: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != inputs {
        return Err(RagError::service(
            provider.model(),
            format!("expected {inputs} embeddings, received {}", vectors.len()),
        ));
    }
    let expected = provider.dimensions();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(RagError::ConfigError(format!(
            "embedding dimension mismatch: expected {expected}, received {}",
            bad.len()
        )));
    }
    Ok(())
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
