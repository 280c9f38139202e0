//! Providers for running without network access.

use async_trait::async_trait;
use docqa_rag::{AnswerSynthesizer, Result, SynthesisRequest};

pub const EMBEDDING_DIMENSIONS: usize = 256;

/// Longest excerpt shown per passage, in characters.
const EXCERPT_CHARS: usize = 300;

/// Answers by listing the retrieved passages instead of generating prose.
pub struct ExcerptSynthesizer {
    separator: String,
}

impl ExcerptSynthesizer {
    /// `separator` must match the one the fused context was joined with.
    pub fn new(separator: impl Into<String>) -> Self {
        Self { separator: separator.into() }
    }
}

#[async_trait]
impl AnswerSynthesizer for ExcerptSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String> {
        let mut answer = String::from("Most relevant passages (offline mode):");
        for (i, passage) in request.fused_context.split(self.separator.as_str()).enumerate() {
            let excerpt: String = passage.chars().take(EXCERPT_CHARS).collect();
            let ellipsis = if passage.chars().count() > EXCERPT_CHARS { "..." } else { "" };
            answer.push_str(&format!("\n[{}] {excerpt}{ellipsis}", i + 1));
        }
        Ok(answer)
    }
}
