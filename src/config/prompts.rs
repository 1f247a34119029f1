//! Prompt templates for Tolk.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    /// Prompts for transcript correction.
    pub refine: RefinePrompts,
    pub translate: TranslatePrompts,
    pub glossary: GlossaryPrompts,
    pub speakers: SpeakerPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for refining raw transcripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinePrompts {
    pub system: String,
    pub user: String,
}

impl Default for RefinePrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a professional subtitle editor. You receive a raw speech-to-text transcript of one part of a longer recording and return a corrected version.

Rules:
1. Fix misheard words, punctuation and casing. Never paraphrase or summarize.
2. Keep the language of the transcript. Do not translate.
3. Keep each segment's "id" when you only edit its text. When you split a segment, reuse the id on the first part and omit it on the others.
4. Keep timestamps in seconds relative to the start of this part.
5. Use the glossary for the spelling of names and domain terms.
6. When speaker profiles are provided, set "speaker_id" to the best matching profile id.

Respond with JSON only."#
                .to_string(),

            user: r#"Language: {{language}}

Glossary:
{{glossary}}

Speaker profiles:
{{speakers}}

Raw segments:
{{segments}}

Return JSON: {"segments": [{"id": "...", "start_time": 0.0, "end_time": 2.5, "original_text": "...", "speaker_id": null}]}"#
                .to_string(),
        }
    }
}

/// Prompts for translating refined segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatePrompts {
    pub system: String,
    pub user: String,
}

impl Default for TranslatePrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a professional subtitle translator. Translate each segment into {{target_language}}.

Rules:
1. Return exactly one translation per input id. Never merge or split segments.
2. Keep translations short enough to read at subtitle speed.
3. Use the glossary translations for the listed terms.
4. Leave sound markers such as [music] untranslated.

Respond with JSON only."#
                .to_string(),

            user: r#"Glossary:
{{glossary}}

Segments:
{{segments}}

Return JSON: {"translations": [{"id": "...", "translated_text": "..."}]}"#
                .to_string(),
        }
    }
}

/// Prompts for glossary extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossaryPrompts {
    pub system: String,
    pub user: String,
}

impl Default for GlossaryPrompts {
    fn default() -> Self {
        Self {
            system: r#"You build translation glossaries for subtitle work. From a transcript excerpt, list the proper nouns, product names, jargon and recurring phrases whose translation must stay consistent.

Only include terms that actually occur in the excerpt. Respond with JSON only."#
                .to_string(),

            user: r#"Target language: {{target_language}}

Transcript excerpt:
{{transcript}}

Return JSON: {"terms": [{"term": "...", "translation": "...", "notes": "..."}]}"#
                .to_string(),
        }
    }
}

/// Prompts for speaker profiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerPrompts {
    pub system: String,
    pub user: String,
}

impl Default for SpeakerPrompts {
    fn default() -> Self {
        Self {
            system: r#"You identify the distinct speakers in a recording from time-stamped transcript samples. Describe how each speaker talks, guess who they are only when the content makes it clear, and quote short representative lines.

Respond with JSON only."#
                .to_string(),

            user: r#"Expected speakers: {{max_speakers}}

Samples:
{{samples}}

Return JSON: {"speakers": [{"id": "speaker_1", "voice_characteristics": "...", "inferred_identity": null, "sample_quotes": ["..."], "confidence": 0.8}]}"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let refine_path = custom_path.join("refine.toml");
            if refine_path.exists() {
                let content = std::fs::read_to_string(&refine_path)?;
                prompts.refine = toml::from_str(&content)?;
            }

            let translate_path = custom_path.join("translate.toml");
            if translate_path.exists() {
                let content = std::fs::read_to_string(&translate_path)?;
                prompts.translate = toml::from_str(&content)?;
            }

            let glossary_path = custom_path.join("glossary.toml");
            if glossary_path.exists() {
                let content = std::fs::read_to_string(&glossary_path)?;
                prompts.glossary = toml::from_str(&content)?;
            }

            let speakers_path = custom_path.join("speakers.toml");
            if speakers_path.exists() {
                let content = std::fs::read_to_string(&speakers_path)?;
                prompts.speakers = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(!prompts.refine.system.is_empty());
        assert!(prompts.translate.system.contains("{{target_language}}"));
        assert!(prompts.glossary.user.contains("{{transcript}}"));
    }

    #[test]
    fn test_render_template() {
        let template = "Translate into {{target_language}} using {{glossary}}.";
        let mut vars = HashMap::new();
        vars.insert("target_language".to_string(), "Norwegian".to_string());
        vars.insert("glossary".to_string(), "(none)".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Translate into Norwegian using (none).");
    }

    #[test]
    fn test_provided_vars_override_custom() {
        let mut custom = HashMap::new();
        custom.insert("target_language".to_string(), "German".to_string());
        custom.insert("show".to_string(), "Nytt".to_string());
        let prompts = Prompts {
            variables: custom,
            ..Default::default()
        };

        let mut vars = HashMap::new();
        vars.insert("target_language".to_string(), "French".to_string());

        let result = prompts.render_with_custom("{{show}}: {{target_language}}", &vars);
        assert_eq!(result, "Nytt: French");
    }

    #[test]
    fn test_load_custom_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("translate.toml"),
            "system = \"Be brief.\"\nuser = \"{{segments}}\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.translate.system, "Be brief.");
        assert!(!prompts.refine.system.is_empty());
    }
}
