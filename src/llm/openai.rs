//! An OpenAI-compatible chat completion backend.
//!
//! Works against OpenAI itself, and against any LiteLLM, Ollama, or other
//! gateway that speaks the same API, the same way
//! `elevatelaw-prompt-scaler/src/drivers/openai.rs`'s `OpenAiDriver` does.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, FinishReason, ImageUrlArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
};

use crate::prelude::*;
use crate::prompt::{ChatPrompt, JsonObject, RenderedMessage, RenderedPrompt, Role};
use crate::schema::get_schema_title;

use super::{ContentResponse, LlmOpts, TokenUsage};

/// Read `OPENAI_API_KEY` / `OPENAI_API_BASE` into a client config, letting a
/// LiteLLM or Ollama gateway substitute for `OPENAI_API_BASE`.
pub fn get_openai_client_config() -> OpenAIConfig {
    let mut config = OpenAIConfig::new();
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        config = config.with_api_key(api_key);
    }
    if let Ok(api_base) = std::env::var("OPENAI_API_BASE") {
        config = config.with_api_base(api_base);
    }
    config
}

/// The model identifier, and whether its provider needs the `store: false`
/// Anthropic-via-LiteLLM workaround suppressed.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model: String,
    /// `true` if LiteLLM is fronting Anthropic for this model; LiteLLM
    /// doesn't understand `store`, and passes it through verbatim, which
    /// Anthropic's endpoint rejects.
    pub is_anthropic: bool,
}

#[derive(Debug)]
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: ModelInfo,
}

impl OpenAiBackend {
    pub fn new(model: ModelInfo) -> Self {
        Self {
            client: Client::with_config(get_openai_client_config()),
            model,
        }
    }
}

#[async_trait]
impl super::LlmBackend for OpenAiBackend {
    #[instrument(level = "debug", skip_all)]
    async fn generate(
        &self,
        prompt: &ChatPrompt,
        bindings: &JsonObject,
        schema: Value,
        opts: &LlmOpts,
    ) -> Result<ContentResponse> {
        let rendered = prompt.render(bindings)?;
        let messages = to_openai_messages(&rendered)?;

        let json_schema = ResponseFormatJsonSchema {
            name: get_schema_title(&schema),
            schema: Some(schema),
            strict: Some(true),
            description: None,
        };

        let mut req = CreateChatCompletionRequestArgs::default();
        req.model(self.model.model.clone())
            .messages(messages)
            .response_format(ResponseFormat::JsonSchema { json_schema });
        if !self.model.is_anthropic {
            req.store(false);
        }
        if let Some(max_completion_tokens) = opts.max_completion_tokens {
            req.max_completion_tokens(max_completion_tokens);
        }
        if let Some(temperature) = opts.temperature {
            req.temperature(temperature);
        }
        if let Some(top_p) = opts.top_p {
            req.top_p(top_p);
        }
        let req = req.build().context("failed to build chat completion request")?;
        trace!(?req, "request");

        let chat_result: Value = self
            .client
            .chat()
            .create_byot(req)
            .await
            .context("chat completion request failed")?;
        debug!(%chat_result, "response");
        let response: CreateChatCompletionResponse = serde_json::from_value(chat_result)
            .context("failed to parse chat completion response")?;

        let token_usage = response.usage.map(|usage| TokenUsage {
            prompt_tokens: u64::from(usage.prompt_tokens),
            completion_tokens: u64::from(usage.completion_tokens),
        });

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no choices in chat completion response"))?;
        if choice.finish_reason == Some(FinishReason::ContentFilter) {
            return Err(anyhow!(
                "content filter triggered (this can also be Gemini's RECITATION error)"
            ));
        }
        let content = choice.message.content.unwrap_or_default();
        let stripped = super::strip_envelopes(&content);
        let content = serde_json::from_str::<Value>(&stripped)
            .with_context(|| format!("model did not return JSON: {content:?}"))?;

        Ok(ContentResponse {
            content,
            token_usage,
        })
    }
}

fn to_openai_messages(prompt: &RenderedPrompt) -> Result<Vec<ChatCompletionRequestMessage>> {
    if prompt.messages.is_empty() {
        return Err(anyhow!("prompt has no messages"));
    }
    prompt.messages.iter().map(to_openai_message).collect()
}

fn to_openai_message(message: &RenderedMessage) -> Result<ChatCompletionRequestMessage> {
    match message.role {
        Role::System => {
            let text = message
                .text
                .as_deref()
                .ok_or_else(|| anyhow!("system message must have text"))?;
            Ok(ChatCompletionRequestSystemMessageArgs::default()
                .content(text)
                .build()?
                .into())
        }
        Role::Assistant => {
            let text = message
                .text
                .as_deref()
                .ok_or_else(|| anyhow!("assistant message must have text"))?;
            Ok(ChatCompletionRequestAssistantMessageArgs::default()
                .content(text)
                .build()?
                .into())
        }
        Role::User if message.images.is_empty() => {
            let text = message.text.as_deref().unwrap_or_default();
            Ok(ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Text(
                    text.to_owned(),
                ))
                .build()?
                .into())
        }
        Role::User => {
            let mut parts = Vec::with_capacity(1 + message.images.len());
            if let Some(text) = &message.text {
                parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(text.to_owned())
                        .build()?,
                ));
            }
            for image in &message.images {
                parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(ImageUrlArgs::default().url(image.to_owned()).build()?)
                        .build()?,
                ));
            }
            Ok(ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(parts))
                .build()?
                .into())
        }
    }
}
