pub mod ai;
pub mod ai_types;
pub mod batcher;
pub mod encoding;
pub mod export;
pub mod merger;
pub mod pipeline;
pub mod qa;
pub mod rebuild;
pub mod selector;
pub mod writer;
