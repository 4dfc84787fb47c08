use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::services::batcher::DEFAULT_BATCH_SIZE;
use crate::services::selector::SelectionMode;

pub const DEFAULT_PROMPTS_FILE: &str = "prompts.yaml";
pub const EXAMPLE_PROMPTS_FILE: &str = "prompts.example.yaml";
pub const DEFAULT_CONTEXT_FILE: &str = "app_context.yaml";

/// The two instruction templates sent with every batch.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromptTemplates {
    pub system_prompt: String,
    pub translation_prompt: String,
}

impl PromptTemplates {
    /// Loads `path`, or `prompts.yaml` then `prompts.example.yaml` when none is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_prompts_path()?,
        };

        let data = fs::read_to_string(&path).map_err(|e| {
            Error::config(format!("failed to read prompts file {}: {e}", path.display()))
        })?;

        let templates = Self::from_yaml(&data)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), "loaded prompt templates");
        Ok(templates)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let templates: PromptTemplates = serde_yaml::from_str(data)
            .map_err(|e| Error::config(format!("invalid prompts file: {e}")))?;

        if templates.system_prompt.trim().is_empty() {
            return Err(Error::config("system_prompt is empty"));
        }
        if templates.translation_prompt.trim().is_empty() {
            return Err(Error::config("translation_prompt is empty"));
        }

        Ok(templates)
    }
}

fn default_prompts_path() -> Result<PathBuf> {
    [DEFAULT_PROMPTS_FILE, EXAMPLE_PROMPTS_FILE]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            Error::config(format!(
                "no prompts file found (tried {DEFAULT_PROMPTS_FILE} and {EXAMPLE_PROMPTS_FILE})"
            ))
        })
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Term {
    pub term: String,
    pub description: String,
}

/// App metadata injected into every translation prompt.
/// Every field is required in the YAML file; an empty list or map is fine.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppContext {
    pub app_description: String,

    /// Names that must appear verbatim in every translation whose source contains them.
    pub preserve_names: Vec<String>,

    pub terminology: Vec<Term>,

    pub style_guide: BTreeMap<String, String>,
}

impl AppContext {
    /// A missing file is only tolerated when `path` is the default location.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !path.exists() {
            if explicit {
                return Err(Error::config(format!(
                    "app context file not found: {}",
                    path.display()
                )));
            }
            warn!(path = %path.display(), "app context file not found, continuing without context");
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read app context {}: {e}", path.display()))
        })?;

        let context = Self::from_yaml(&data)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            terms = context.terminology.len(),
            preserved = context.preserve_names.len(),
            "loaded app context"
        );
        Ok(context)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        serde_yaml::from_str(data).map_err(|e| Error::config(format!("invalid app context: {e}")))
    }

    /// Renders the context blob substituted for `{app_context}`.
    pub fn render(&self) -> String {
        if self.app_description.is_empty()
            && self.terminology.is_empty()
            && self.style_guide.is_empty()
            && self.preserve_names.is_empty()
        {
            return String::new();
        }

        let mut out = self.app_description.trim_end().to_string();

        if !self.terminology.is_empty() {
            out.push_str("\n\nKey Terminology:\n");
            for t in &self.terminology {
                out.push_str(&format!("- {}: {}\n", t.term, t.description));
            }
        }

        if !self.style_guide.is_empty() {
            out.push_str("\nStyle Guide:\n");
            for (key, value) in &self.style_guide {
                out.push_str(&format!("- {key}: {value}\n"));
            }
        }

        if !self.preserve_names.is_empty() {
            out.push_str("\nNever translate these names, keep them exactly as written:\n");
            for name in &self.preserve_names {
                out.push_str(&format!("- {name}\n"));
            }
        }

        out
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[value(name = "openai")]
    OpenAi,
    #[value(name = "deepseek")]
    DeepSeek,
}

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-3-5-sonnet-20241022",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::DeepSeek => "deepseek-chat",
        }
    }

    /// Environment variables checked, in order, for the API key.
    pub fn key_vars(self) -> &'static [&'static str] {
        match self {
            Provider::Anthropic => &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
            Provider::OpenAi => &["OPENAI_API_KEY"],
            Provider::DeepSeek => &["DEEPSEEK_API_KEY"],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl LlmSettings {
    /// Resolves the API key from `api_key` or the provider's environment variables.
    pub fn new(provider: Provider, model: Option<String>, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                provider
                    .key_vars()
                    .iter()
                    .find_map(|var| std::env::var(var).ok().filter(|k| !k.trim().is_empty()))
            })
            .ok_or_else(|| {
                Error::config(format!(
                    "no API key for {provider}; set {}",
                    provider.key_vars().join(" or ")
                ))
            })?;

        Ok(LlmSettings {
            provider,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            api_key,
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 60,
            max_retries: 3,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub mode: SelectionMode,
    pub batch_size: usize,
    /// Largest surplus of response lines that may still be realigned.
    pub max_realign_drift: usize,
    /// Retry count-mismatched units in halved batches.
    pub split_on_mismatch: bool,
    /// Append existing translations to the context as read-only references.
    pub reference_translations: bool,
    pub max_reference_entries: usize,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        TranslateOptions {
            mode: SelectionMode::Default,
            batch_size: DEFAULT_BATCH_SIZE,
            max_realign_drift: 1,
            split_on_mismatch: true,
            reference_translations: true,
            max_reference_entries: 50,
        }
    }
}

/// Everything a run needs besides the translator, loaded once and never mutated.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub templates: PromptTemplates,
    pub context: AppContext,
    pub options: TranslateOptions,
    context_text: String,
}

impl RunConfig {
    pub fn new(templates: PromptTemplates, context: AppContext, options: TranslateOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::config("batch size must be at least 1"));
        }

        let context_text = context.render();
        Ok(RunConfig {
            templates,
            context,
            options,
            context_text,
        })
    }

    pub fn context_text(&self) -> &str {
        &self.context_text
    }
}
