//! Fills the untranslated targets of XLIFF 1.2 files with an LLM, batch by
//! batch, and writes them back without disturbing the rest of the file.

pub mod error;
pub mod model;
pub mod parsers;
pub mod services;

pub use error::{Error, Result};
pub use model::config::{AppContext, LlmSettings, PromptTemplates, Provider, RunConfig, TranslateOptions};
pub use model::document::Document;
pub use services::ai::{ChatClient, Translator};
pub use services::ai_types::{RunResult, RunStatus, RunSummary};
pub use services::pipeline::Pipeline;
pub use services::selector::SelectionMode;
