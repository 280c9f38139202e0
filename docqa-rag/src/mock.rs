//! Deterministic providers for tests and offline runs.
//!
//! [`MockEmbeddingProvider`] hashes words into a fixed number of buckets, so
//! texts sharing vocabulary land close together without any network call.
//! [`MockGenerativeProvider`] replays scripted responses and records every
//! prompt it receives.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::GenerativeProvider;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Bag-of-words embedder with optional fixed vectors for exact texts.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    overrides: HashMap<String, Vec<f32>>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    /// Create an embedder producing `dimensions`-component vectors.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, overrides: HashMap::new(), fail: false, calls: AtomicUsize::new(0) }
    }

    /// Return `vector` whenever exactly `text` is embedded.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.into(), vector);
        self
    }

    /// Make every call fail with a service error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.overrides.get(text) {
            return vector.clone();
        }
        let mut vector = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return vector;
        }
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = (fnv1a(&word.to_lowercase()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RagError::service("mock-embedding", "simulated provider outage"));
        }
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }
}

/// Generative model that replays queued responses.
///
/// Once the queue is empty every call returns the fallback response.
#[derive(Debug, Default)]
pub struct MockGenerativeProvider {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

impl MockGenerativeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner).push_back(response.into());
        self
    }

    /// Set the response used once the queue runs out.
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = response.into();
        self
    }

    /// Make every call fail with a service error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl GenerativeProvider for MockGenerativeProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).push(prompt.to_string());
        if self.fail {
            return Err(RagError::service("mock-generation", "simulated provider outage"));
        }
        let queued = self.responses.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        Ok(queued.unwrap_or_else(|| self.fallback.clone()))
    }

    fn model(&self) -> &str {
        "mock-generation"
    }
}
