//! The prompt template type and its handlebars-based renderer.
//!
//! One `ChatPrompt` is loaded per aspect template (`SPEC_FULL.md` §6.1) from a
//! TOML file under `prompts/`. Rendering fills in the named variable set with
//! a bare `Handlebars::new()` — no custom helpers, no scripting; per §9's
//! design note, a pure text-substitution engine with a curated default helper
//! library is exactly what the core needs.

use handlebars::Handlebars;

use crate::prelude::*;

/// A JSON object, used for the assistant half of a few-shot example message.
pub type JsonObject = serde_json::Map<String, Value>;

/// A chat completion prompt: an optional system/developer message, followed
/// by alternating user/assistant messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatPrompt {
    pub developer: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One message in a `ChatPrompt`.
///
/// `images` holds handlebars templates that render to `data:` URLs (see
/// `crate::data_url`); this is how the OCR vision backend attaches a page
/// image to a prompt without the template author needing to know anything
/// about multipart content types.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub user: String,
    #[serde(default)]
    pub images: Vec<String>,
    /// A few-shot assistant response, always a JSON object.
    pub assistant: Option<JsonObject>,
}

/// A message after rendering: plain text plus zero or more image URLs.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub role: Role,
    pub text: Option<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A `ChatPrompt` with every template expression filled in.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub messages: Vec<RenderedMessage>,
}

impl ChatPrompt {
    /// Render every message's templates against `bindings`.
    pub fn render(&self, bindings: &JsonObject) -> Result<RenderedPrompt> {
        let handlebars = Handlebars::new();
        let mut messages = Vec::new();
        if let Some(developer) = &self.developer {
            messages.push(RenderedMessage {
                role: Role::System,
                text: Some(handlebars.render_template(developer, bindings)?),
                images: Vec::new(),
            });
        }
        for message in &self.messages {
            let text = handlebars.render_template(&message.user, bindings)?;
            let images = message
                .images
                .iter()
                .map(|tpl| handlebars.render_template(tpl, bindings))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            messages.push(RenderedMessage {
                role: Role::User,
                text: Some(text),
                images,
            });
            if let Some(assistant) = &message.assistant {
                messages.push(RenderedMessage {
                    role: Role::Assistant,
                    text: Some(Value::Object(assistant.clone()).to_string()),
                    images: Vec::new(),
                });
            }
        }
        Ok(RenderedPrompt { messages })
    }
}

/// Parse a `ChatPrompt` from its TOML source.
pub fn parse_prompt(toml_source: &str) -> Result<ChatPrompt> {
    toml::from_str(toml_source).context("failed to parse prompt template")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_variables_and_images() {
        let prompt = parse_prompt(
            r#"
            developer = "You translate to {{Language}}."

            [[messages]]
            user = "Transcribe: {{Content}}"
            images = ["data:image/png;base64,{{ImageB64}}"]
            "#,
        )
        .unwrap();
        let mut bindings = JsonObject::new();
        bindings.insert("Language".to_string(), json!("French"));
        bindings.insert("Content".to_string(), json!("hello"));
        bindings.insert("ImageB64".to_string(), json!("AAAA"));
        let rendered = prompt.render(&bindings).unwrap();
        assert_eq!(rendered.messages.len(), 2);
        assert_eq!(rendered.messages[0].role, Role::System);
        assert_eq!(
            rendered.messages[0].text.as_deref(),
            Some("You translate to French.")
        );
        assert_eq!(rendered.messages[1].images, vec!["data:image/png;base64,AAAA"]);
    }
}
