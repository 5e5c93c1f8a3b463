pub mod client;
pub mod extract;
pub mod models;
pub mod parse;
pub mod prompts;

pub use client::{
    CompletionProvider, CompletionRequest, CompletionResponse, OpenAiProvider, OpenAiSettings,
    ProviderError,
};
pub use extract::{extract_text, ExtractedText};
pub use models::{merge_usage, Model, Usage};
