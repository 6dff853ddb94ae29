//! The abstract LLM contract the suggestion engine and the vision OCR backend
//! both invoke, plus the rate-limited retrying wrapper around it.
//!
//! Per `SPEC_FULL.md` §9, backend families are a tagged dispatch enum, not
//! trait-object inheritance; see [`LlmBackendKind`].

pub mod fake;
pub mod openai;
pub mod rate_limited;

use crate::prelude::*;
use crate::prompt::ChatPrompt;

/// Options controlling a single LLM call. Grounded on
/// `elevatelaw-prompt-scaler/src/drivers/mod.rs`'s `LlmOpts`.
#[derive(Debug, Clone, Default)]
pub struct LlmOpts {
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// The response of one LLM call: the parsed JSON content plus, if the
/// provider reported it, token usage for cost accounting.
#[derive(Debug, Clone)]
pub struct ContentResponse {
    pub content: Value,
    pub token_usage: Option<TokenUsage>,
}

/// Token usage reported by a provider, used for cost telemetry (distinct from
/// the pre-flight estimate in `crate::tokens`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

/// Strip an optional `<think>...</think>` reasoning span, then an optional
/// fenced ```json code block, from a raw model response. Reasoning models
/// sometimes wrap structured output in both despite a JSON-schema request;
/// every backend's raw text passes through this before JSON parsing.
pub fn strip_envelopes(raw: &str) -> String {
    let without_think = match (raw.find("<think>"), raw.find("</think>")) {
        (Some(start), Some(end)) if end > start => {
            format!("{}{}", &raw[..start], &raw[end + "</think>".len()..])
        }
        _ => raw.to_string(),
    };
    let trimmed = without_think.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim().to_string()
}

/// `{generate(prompt, imageBytes?) -> ContentResponse}` from §9. Images are
/// attached via `ChatPrompt`'s per-message `images` field, so this trait
/// doesn't need a separate image parameter.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send a rendered prompt, requesting a JSON response conforming to
    /// `schema`.
    async fn generate(
        &self,
        prompt: &ChatPrompt,
        bindings: &crate::prompt::JsonObject,
        schema: Value,
        opts: &LlmOpts,
    ) -> Result<ContentResponse>;
}

/// The tagged dispatch enum over concrete `LlmBackend` implementations.
pub enum LlmBackendKind {
    OpenAi(openai::OpenAiBackend),
    Fake(fake::FakeLlmBackend),
}

#[async_trait]
impl LlmBackend for LlmBackendKind {
    async fn generate(
        &self,
        prompt: &ChatPrompt,
        bindings: &crate::prompt::JsonObject,
        schema: Value,
        opts: &LlmOpts,
    ) -> Result<ContentResponse> {
        match self {
            LlmBackendKind::OpenAi(b) => b.generate(prompt, bindings, schema, opts).await,
            LlmBackendKind::Fake(b) => b.generate(prompt, bindings, schema, opts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_envelopes_removes_think_span_and_fence() {
        let raw = "<think>reasoning here</think>```json\n{\"a\":1}\n```";
        assert_eq!(strip_envelopes(raw), "{\"a\":1}");
    }

    #[test]
    fn strip_envelopes_is_noop_on_plain_json() {
        assert_eq!(strip_envelopes("{\"a\":1}"), "{\"a\":1}");
    }
}
