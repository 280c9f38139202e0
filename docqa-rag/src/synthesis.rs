//! Answer synthesis boundary: fused context in, cited answer out.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::FusedResult;
use crate::error::Result;
use crate::generation::GenerativeProvider;

/// Reply given when retrieval produced no evidence.
pub const INSUFFICIENT_INFORMATION: &str = "Insufficient information in the DB.";

/// The concatenated text of fused results, in fused order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedContext {
    /// Chunk texts joined with the configured separator.
    pub text: String,
    /// The results the text was built from.
    pub sources: Vec<FusedResult>,
}

impl FusedContext {
    /// Join the chunk texts of `results` with `separator`.
    pub fn new(results: Vec<FusedResult>, separator: &str) -> Self {
        let text = results.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>().join(separator);
        Self { text, sources: results }
    }

    /// Returns `true` when there is no evidence to answer from.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Everything an [`AnswerSynthesizer`] needs to answer one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub fused_context: String,
    pub conversation_history: String,
    pub question: String,
}

/// Produces an answer grounded in the fused context.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    /// Return the answer text for `request`.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String>;
}

/// Research-assistant prompt with inline citation instructions.
pub const DEFAULT_ANSWER_TEMPLATE: &str = "You are a research assistant answering questions \
about the user's documents. Answer using ONLY the context below. Use the chat history for \
continuity but do not add facts that are not in the context.\n\n\
=== Chat History ===\n{history}\n\n\
=== Context ===\n{context}\n\n\
=== Instructions ===\n\
1. If the question is about the conversation itself (earlier questions, a summary of the \
exchange), answer from the chat history alone and cite nothing.\n\
2. Otherwise base the answer strictly on the context. If the context does not contain the \
answer, reply: 'The provided context does not contain this information.'\n\
3. Use a formal, academic tone.\n\
4. Cite excerpts inline as [1], [2], ... in the order they are first used, trimming cited \
sentences to the relevant part.\n\
5. After the answer add a 'References' section listing each cited number with its excerpt.\n\n\
Question:\n{question}\n";

/// An [`AnswerSynthesizer`] that renders a prompt template and sends it to
/// a [`GenerativeProvider`].
///
/// The template may use `{history}`, `{context}` and `{question}`.
pub struct PromptSynthesizer {
    generator: Arc<dyn GenerativeProvider>,
    template: String,
}

impl PromptSynthesizer {
    /// Create a synthesizer using [`DEFAULT_ANSWER_TEMPLATE`].
    pub fn new(generator: Arc<dyn GenerativeProvider>) -> Self {
        Self { generator, template: DEFAULT_ANSWER_TEMPLATE.to_string() }
    }

    /// Replace the prompt template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }
}

#[async_trait]
impl AnswerSynthesizer for PromptSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String> {
        let variables = BTreeMap::from([
            ("history", request.conversation_history.clone()),
            ("context", request.fused_context.clone()),
            ("question", request.question.clone()),
        ]);
        self.generator.generate(&self.template, &variables).await
    }
}
