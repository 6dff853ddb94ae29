//! Persisted settings and prompt templates (`SPEC_FULL.md` §2.1, §6.2).
//!
//! Grounded on `litellm.rs`'s cached-on-first-use style, simplified to plain
//! async functions returning owned values rather than a `once_cell` held
//! behind a `'static` — `main.rs` loads both once at startup and hands out
//! `Arc`s, so there's no lazy-init race to guard against. Template seeding
//! follows `queues/ocr/engines/llm.rs`'s `include_str!`-embedded default
//! pattern: ship one embedded TOML per aspect, and copy it out to `prompts/`
//! the first time that file is missing.

use crate::prelude::*;
use crate::model::Settings;
use crate::prompt::{ChatPrompt, parse_prompt};
use crate::suggest::Templates;

/// Aspect template names, in the order `default_prompts/` ships them.
/// `ocr` is the one template not driven by `suggest::aspects::Aspect`.
const TEMPLATE_NAMES: [&str; 7] = [
    "title",
    "tag",
    "correspondent",
    "document_type",
    "created_date",
    "custom_fields",
    "ocr",
];

fn default_template_source(name: &str) -> &'static str {
    match name {
        "title" => include_str!("../default_prompts/title.toml"),
        "tag" => include_str!("../default_prompts/tag.toml"),
        "correspondent" => include_str!("../default_prompts/correspondent.toml"),
        "document_type" => include_str!("../default_prompts/document_type.toml"),
        "created_date" => include_str!("../default_prompts/created_date.toml"),
        "custom_fields" => include_str!("../default_prompts/custom_fields.toml"),
        "ocr" => include_str!("../default_prompts/ocr.toml"),
        other => unreachable!("no embedded default prompt for {other:?}"),
    }
}

/// Load `Settings` from `path`, falling back to `Settings::default()` if the
/// file is absent or fails to parse. A malformed settings file is logged and
/// ignored rather than treated as fatal: the core always has a usable
/// default to run with.
pub async fn load_settings(path: &Path) -> Settings {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
        Err(error) => {
            warn!(%error, path = %path.display(), "failed to read settings file, using defaults");
            return Settings::default();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(settings) => settings,
        Err(error) => {
            warn!(%error, path = %path.display(), "settings file is malformed, using defaults");
            Settings::default()
        }
    }
}

/// Write `settings` to `path` as pretty JSON, creating parent directories as
/// needed.
pub async fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("failed to create settings directory {:?}", parent.display())
        })?;
    }
    let json = serde_json::to_vec_pretty(settings).context("failed to serialize settings")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write settings file {:?}", path.display()))
}

/// Load every aspect's prompt template from `dir`, seeding any file that
/// doesn't exist yet from the embedded defaults. Existing files are never
/// overwritten, so operator edits to `prompts/*.toml` survive restarts.
pub async fn load_templates(dir: &Path) -> Result<Templates> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create prompt directory {:?}", dir.display()))?;

    let mut templates = Templates::new();
    for name in TEMPLATE_NAMES {
        let path = dir.join(format!("{name}.toml"));
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                let default = default_template_source(name);
                tokio::fs::write(&path, default)
                    .await
                    .with_context(|| format!("failed to seed default prompt {:?}", path.display()))?;
                default.to_string()
            }
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read prompt {:?}", path.display()));
            }
        };
        let prompt: ChatPrompt =
            parse_prompt(&source).with_context(|| format!("failed to parse prompt {:?}", path.display()))?;
        templates.insert(static_name(name), prompt);
    }
    Ok(templates)
}

/// `Templates` is keyed by `&'static str` (`Aspect::template_name()`'s
/// return type); map the runtime name back to one of those statics rather
/// than leaking a `String`.
fn static_name(name: &str) -> &'static str {
    TEMPLATE_NAMES
        .iter()
        .find(|candidate| **candidate == name)
        .expect("name is always one of TEMPLATE_NAMES")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json")).await;
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn malformed_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let settings = load_settings(&path).await;
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn roundtrips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            custom_fields_enabled: true,
            selected_custom_field_ids: vec![1, 2],
            ..Default::default()
        };
        save_settings(&path, &settings).await.unwrap();
        let loaded = load_settings(&path).await;
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn seeds_missing_prompts_and_leaves_existing_ones_alone() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("title.toml"), "developer = \"custom\"\n")
            .await
            .unwrap();

        let templates = load_templates(dir.path()).await.unwrap();
        assert_eq!(templates.len(), TEMPLATE_NAMES.len());

        let title_on_disk = tokio::fs::read_to_string(dir.path().join("title.toml"))
            .await
            .unwrap();
        assert_eq!(title_on_disk, "developer = \"custom\"\n");

        assert!(dir.path().join("ocr.toml").exists());
    }
}
