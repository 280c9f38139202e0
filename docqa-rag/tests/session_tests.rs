//! End-to-end tests for the session: indexing, asking, degradation and reset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::config::RagConfig;
use docqa_rag::document::Document;
use docqa_rag::embedding::EmbeddingProvider;
use docqa_rag::error::{RagError, Result};
use docqa_rag::fusion::FusionWeights;
use docqa_rag::memory::Role;
use docqa_rag::mock::{MockEmbeddingProvider, MockGenerativeProvider};
use docqa_rag::retrieval::RetrievalStrategy;
use docqa_rag::session::{AnswerStatus, Session};
use docqa_rag::synthesis::{AnswerSynthesizer, INSUFFICIENT_INFORMATION, SynthesisRequest};
use docqa_telemetry::{SharedEventStorage, capture_events};
use tracing::Level;

const RUST_NOTE: &str = "Rust manages memory through ownership and has no garbage collector.";
const BREAD_NOTE: &str = "Sourdough bread needs a starter, flour, water and salt.";
const ANSWER: &str = "Rust has no garbage collector [1].\n\nReferences\n[1] Rust manages memory";

/// Embedder that can be switched into failure after indexing.
struct SwitchableEmbedder {
    inner: MockEmbeddingProvider,
    failing: AtomicBool,
}

impl SwitchableEmbedder {
    fn new() -> Self {
        Self { inner: MockEmbeddingProvider::new(256), failing: AtomicBool::new(false) }
    }

    fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for SwitchableEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::service("switchable", "quota exhausted"));
        }
        self.inner.embed(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        "switchable"
    }
}

/// Embedder whose vectors gain a component once `widen` is called, as a
/// provider silently switching models would.
struct WideningEmbedder {
    widened: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for WideningEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let vector =
            if self.widened.load(Ordering::SeqCst) { vec![1.0, 0.0, 0.0] } else { vec![1.0, 0.0] };
        Ok(texts.iter().map(|_| vector.clone()).collect())
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn model(&self) -> &str {
        "widening"
    }
}

/// Embedder that takes longer for texts mentioning "slow".
struct DelayedEmbedder {
    inner: MockEmbeddingProvider,
}

#[async_trait]
impl EmbeddingProvider for DelayedEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("slow")) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.embed(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        "delayed"
    }
}

/// Synthesizer that echoes the fused context back.
struct EchoSynthesizer;

#[async_trait]
impl AnswerSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String> {
        Ok(format!("context: {}", request.fused_context))
    }
}

fn documents() -> Vec<Document> {
    vec![Document::new(RUST_NOTE, "rust.txt"), Document::new(BREAD_NOTE, "bread.txt")]
}

fn generator() -> Arc<MockGenerativeProvider> {
    Arc::new(
        MockGenerativeProvider::new()
            .with_response("1. Is Rust garbage collected?\n2. How does Rust manage memory?\n3. Does Rust have a collector?")
            .with_fallback(ANSWER),
    )
}

fn session(embedder: Arc<dyn EmbeddingProvider>, generator: Arc<MockGenerativeProvider>) -> Session {
    Session::builder()
        .config(RagConfig::default())
        .embedding_provider(embedder)
        .generative_provider(generator)
        .build()
        .unwrap()
}

#[tokio::test]
async fn grounded_answer_cites_the_relevant_chunk_first() {
    let generator = generator();
    let session = session(Arc::new(MockEmbeddingProvider::new(256)), generator.clone());

    let report = session.start(&documents()).await.unwrap();
    assert_eq!(report.documents, 2);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.generation, Some(1));

    let answer = session.ask("Does Rust have a garbage collector?").await.unwrap();
    assert_eq!(answer.status, AnswerStatus::Grounded);
    assert_eq!(answer.text, ANSWER);
    assert_eq!(answer.sources[0].chunk.text, RUST_NOTE);

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("Does Rust have a garbage collector?"));
    assert!(prompts[1].contains(RUST_NOTE));
    assert!(prompts[1].contains("User: Does Rust have a garbage collector?"));

    let history = session.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text, ANSWER);
}

#[tokio::test]
async fn asking_before_start_is_insufficient_information() {
    let embedder = Arc::new(MockEmbeddingProvider::new(32));
    let generator = generator();
    let session = session(embedder.clone(), generator.clone());

    let answer = session.ask("Anything in there?").await.unwrap();
    assert_eq!(answer.status, AnswerStatus::InsufficientInformation);
    assert_eq!(answer.text, INSUFFICIENT_INFORMATION);
    assert!(answer.sources.is_empty());
    assert_eq!(embedder.calls(), 0);
    assert!(generator.prompts().is_empty());
    assert_eq!(session.history().await.len(), 2);
}

#[tokio::test]
async fn starting_with_no_documents_leaves_the_index_unchanged() {
    let session = session(Arc::new(MockEmbeddingProvider::new(32)), generator());

    let report = session.start(&[]).await.unwrap();
    assert_eq!(report.generation, None);
    assert!(!session.has_index().await);

    session.start(&documents()).await.unwrap();
    let report = session.start(&[]).await.unwrap();
    assert_eq!(report.generation, Some(1));
    assert_eq!(session.indexed_chunks().await, 2);
}

#[tokio::test]
async fn blank_documents_build_an_empty_index() {
    let session = session(Arc::new(MockEmbeddingProvider::new(32)), generator());
    let report = session.start(&[Document::new("", "empty.txt")]).await.unwrap();

    assert_eq!(report.chunks, 0);
    assert!(session.has_index().await);
    let answer = session.ask("What is inside?").await.unwrap();
    assert_eq!(answer.status, AnswerStatus::InsufficientInformation);
}

#[tokio::test]
async fn failed_paraphrasing_degrades_to_remaining_strategies() {
    let session = Session::builder()
        .embedding_provider(Arc::new(MockEmbeddingProvider::new(256)))
        .generative_provider(Arc::new(MockGenerativeProvider::new().failing()))
        .synthesizer(Arc::new(EchoSynthesizer))
        .build()
        .unwrap();
    session.start(&documents()).await.unwrap();

    let fused = session.retrieve("Does Rust have a garbage collector?").await.unwrap();
    assert_eq!(fused.len(), 2);
    // similarity and MMR both rank the Rust note first: 0.30 / 61 + 0.40 / 61
    assert!((fused[0].fused_score - 0.70 / 61.0).abs() < 1e-12);

    let answer = session.ask("Does Rust have a garbage collector?").await.unwrap();
    assert_eq!(answer.status, AnswerStatus::Grounded);
    assert!(answer.text.starts_with(&format!("context: {RUST_NOTE}")));
}

#[tokio::test]
async fn failed_strategy_is_logged_with_its_name() {
    let storage = SharedEventStorage::new();
    let _guard = capture_events(&storage);

    let session = Session::builder()
        .embedding_provider(Arc::new(MockEmbeddingProvider::new(64)))
        .generative_provider(Arc::new(MockGenerativeProvider::new().failing()))
        .build()
        .unwrap();
    session.start(&documents()).await.unwrap();
    session.retrieve("Does Rust have a garbage collector?").await.unwrap();

    let warnings = storage.find(Level::WARN, "strategy failed, fusing remaining strategies");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field("strategy").as_deref(), Some("multi_query"));
    assert_eq!(storage.find(Level::INFO, "index built").len(), 1);
}

#[tokio::test]
async fn provider_outage_while_asking_is_insufficient_information() {
    let embedder = Arc::new(SwitchableEmbedder::new());
    let session = session(embedder.clone(), generator());
    session.start(&documents()).await.unwrap();

    embedder.fail();
    let err = session.retrieve("Does Rust have a garbage collector?").await.unwrap_err();
    assert!(matches!(err, RagError::ServiceError { .. }));

    let answer = session.ask("Does Rust have a garbage collector?").await.unwrap();
    assert_eq!(answer.status, AnswerStatus::InsufficientInformation);
}

#[tokio::test]
async fn failed_rebuild_keeps_the_previous_index() {
    let embedder = Arc::new(SwitchableEmbedder::new());
    let session = session(embedder.clone(), generator());
    session.start(&documents()).await.unwrap();

    embedder.fail();
    let err = session.start(&[Document::new("A replacement document.", "new.txt")]).await;
    assert!(err.is_err());
    assert_eq!(session.index_generation().await, Some(1));
    assert_eq!(session.indexed_chunks().await, 2);
}

#[tokio::test]
async fn rebuild_replaces_the_index_wholesale() {
    let session = session(Arc::new(MockEmbeddingProvider::new(256)), generator());
    session.start(&documents()).await.unwrap();
    let report = session.start(&[Document::new(BREAD_NOTE, "bread.txt")]).await.unwrap();

    assert_eq!(report.generation, Some(2));
    assert_eq!(session.indexed_chunks().await, 1);
}

#[tokio::test]
async fn concurrent_reader_sees_a_complete_index() {
    let session = session(Arc::new(MockEmbeddingProvider::new(256)), generator());
    session.start(&documents()).await.unwrap();
    let replacement = vec![Document::new("Only one note about tea.", "tea.txt")];

    let (rebuilt, fused) =
        tokio::join!(session.start(&replacement), session.retrieve("What is in the notes?"));
    rebuilt.unwrap();
    let count = fused.unwrap().len();
    assert!(count == 2 || count == 1, "saw a partial index with {count} chunks");
}

#[tokio::test]
async fn reset_clears_history_but_keeps_the_index() {
    let session = session(Arc::new(MockEmbeddingProvider::new(256)), generator());
    session.start(&documents()).await.unwrap();
    session.ask("Does Rust have a garbage collector?").await.unwrap();

    session.reset().await;
    assert!(session.history().await.is_empty());
    assert!(session.has_index().await);
}

#[test]
fn invalid_configuration_is_rejected_at_build_time() {
    let mut config = RagConfig::default();
    config.chunk_overlap = config.chunk_size;
    let err = Session::builder()
        .config(config)
        .embedding_provider(Arc::new(MockEmbeddingProvider::new(8)))
        .generative_provider(Arc::new(MockGenerativeProvider::new()))
        .build()
        .err()
        .unwrap();
    assert!(err.is_config());

    let missing = Session::builder().embedding_provider(Arc::new(MockEmbeddingProvider::new(8)));
    assert!(missing.build().err().unwrap().is_config());
}

#[tokio::test]
async fn single_strategy_weights_run_only_that_strategy() {
    let config = RagConfig::builder()
        .fusion_weights(FusionWeights::from_pairs([(RetrievalStrategy::Similarity, 1.0)]).unwrap())
        .build()
        .unwrap();
    let generator = generator();
    let session = Session::builder()
        .config(config)
        .embedding_provider(Arc::new(MockEmbeddingProvider::new(256)))
        .generative_provider(generator.clone())
        .build()
        .unwrap();
    session.start(&documents()).await.unwrap();

    let fused = session.retrieve("Does Rust have a garbage collector?").await.unwrap();
    assert_eq!(fused[0].chunk.text, RUST_NOTE);
    assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn failed_question_is_still_answered_in_the_history() {
    let embedder = Arc::new(WideningEmbedder { widened: AtomicBool::new(false) });
    let session = session(embedder.clone(), generator());
    session.start(&documents()).await.unwrap();

    embedder.widened.store(true, Ordering::SeqCst);
    let err = session.ask("Does Rust have a garbage collector?").await.unwrap_err();
    assert!(err.is_config());

    let history = session.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text, INSUFFICIENT_INFORMATION);
}

#[tokio::test(start_paused = true)]
async fn overlapping_starts_install_the_highest_generation_last() {
    let embedder = Arc::new(DelayedEmbedder { inner: MockEmbeddingProvider::new(64) });
    let session = session(embedder, generator());
    let slow = vec![
        Document::new("A slow first note.", "slow-1.txt"),
        Document::new("A slow second note.", "slow-2.txt"),
    ];
    let fast = vec![Document::new("A quick note.", "fast.txt")];

    let (slow_report, fast_report) = tokio::join!(session.start(&slow), session.start(&fast));
    let (slow_report, fast_report) = (slow_report.unwrap(), fast_report.unwrap());

    // the fast rebuild finishes first, so the slow one is the newer index
    assert_eq!(fast_report.generation, Some(1));
    assert_eq!(slow_report.generation, Some(2));
    assert_eq!(session.index_generation().await, Some(2));
    assert_eq!(session.indexed_chunks().await, 2);
}
