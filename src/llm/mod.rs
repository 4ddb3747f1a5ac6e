pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{LlmClient, LlmRequest, LlmResponse, OpenRouterClient, DEFAULT_BASE_URL};
pub use models::{Usage, DEFAULT_MODEL};
pub use parse::{parse_json_response, strip_code_fences, ParseError};
pub use prompts::{PromptOverrides, Prompts};
