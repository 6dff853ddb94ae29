//! A deterministic `LlmBackend` for tests, grounded on
//! `elevatelaw-prompt-scaler/src/drivers/echo.rs`'s `EchoDriver`: it echoes
//! the last rendered user message back as `{"echo": <text>}`.

use crate::prelude::*;
use crate::prompt::{ChatPrompt, JsonObject, Role};

use super::{ContentResponse, LlmOpts, TokenUsage};

#[derive(Debug, Default)]
pub struct FakeLlmBackend;

impl FakeLlmBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl super::LlmBackend for FakeLlmBackend {
    async fn generate(
        &self,
        prompt: &ChatPrompt,
        bindings: &JsonObject,
        _schema: Value,
        _opts: &LlmOpts,
    ) -> Result<ContentResponse> {
        let rendered = prompt.render(bindings)?;
        let text = rendered
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.text.clone())
            .ok_or_else(|| anyhow!("no user message found in prompt"))?;
        Ok(ContentResponse {
            content: json!({ "echo": text }),
            token_usage: Some(TokenUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmBackend;
    use crate::prompt::parse_prompt;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let prompt = parse_prompt(
            r#"
            [[messages]]
            user = "hello {{Name}}"
            "#,
        )
        .unwrap();
        let mut bindings = JsonObject::new();
        bindings.insert("Name".to_string(), json!("world"));
        let backend = FakeLlmBackend::new();
        let response = backend
            .generate(&prompt, &bindings, json!({}), &LlmOpts::default())
            .await
            .unwrap();
        assert_eq!(response.content, json!({ "echo": "hello world" }));
    }
}
