//! Generative model boundary used by query expansion and answer synthesis.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

/// A text-in, text-out generative model.
///
/// Implementors provide [`complete`](GenerativeProvider::complete); callers
/// usually go through [`generate`](GenerativeProvider::generate), which
/// fills `{name}` placeholders in a prompt template first.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Send a fully rendered prompt and return the model's text response.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Render `template` with `variables` and complete it.
    async fn generate(
        &self,
        template: &str,
        variables: &BTreeMap<&str, String>,
    ) -> Result<String> {
        let prompt = render_template(template, variables);
        self.complete(&prompt).await
    }

    /// Return the model identifier used for generation.
    fn model(&self) -> &str;
}

/// Substitute `{name}` placeholders with the matching variable.
///
/// Placeholders without a matching variable are left untouched.
pub fn render_template(template: &str, variables: &BTreeMap<&str, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if variables.contains_key(&after[..close]) => {
                rendered.push_str(&variables[&after[..close]]);
                rest = &after[close + 1..];
            }
            _ => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}
