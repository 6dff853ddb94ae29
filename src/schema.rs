//! JSON Schema support for structured LLM output.
//!
//! Every aspect response type derives `schemars::JsonSchema`; this module
//! turns that into the strict-mode JSON Schema OpenAI-compatible APIs expect,
//! the way `elevatelaw-prompt-scaler/src/schema.rs`'s `Schema::from_type` does.

use schemars::{JsonSchema, SchemaGenerator, r#gen::SchemaSettings};

use crate::prelude::*;

/// Generate a strict-mode JSON Schema for `T`.
pub fn schema_for<T: JsonSchema>() -> Value {
    // Gemini and some LiteLLM-fronted models dislike `definitions`, so inline
    // all subschemas, matching the teacher's `Schema::from_type`.
    let mut settings = SchemaSettings::draft07();
    settings.inline_subschemas = true;
    let generator = SchemaGenerator::new(settings);
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(schema).expect("failed to convert schema to JSON")
}

/// Get a short machine-friendly name for a schema, for
/// `ResponseFormatJsonSchema::name`, which most providers require to be a
/// valid identifier.
pub fn get_schema_title(schema: &Value) -> String {
    schema
        .get("title")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "response".to_string())
}

/// Validate a response `Value` against `schema`, for providers (or test
/// fakes) that don't enforce strict mode themselves.
pub fn validate(schema: &Value, instance: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema).context("invalid response schema")?;
    if let Err(error) = validator.validate(instance) {
        return Err(anyhow!("response failed schema validation: {error}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct Example {
        #[allow(dead_code)]
        text: String,
    }

    #[test]
    fn schema_title_defaults_when_absent() {
        assert_eq!(get_schema_title(&json!({})), "response");
    }

    #[test]
    fn schema_for_derives_object_type() {
        let schema = schema_for::<Example>();
        assert_eq!(schema["type"], json!("object"));
    }
}
