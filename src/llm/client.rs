use super::models::{Usage, DEFAULT_MAX_TOKENS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// OpenAI-compatible base URL used when none is configured
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// One system + user exchange with the model
#[derive(Debug, Clone)]
pub struct LlmRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

impl<'a> LlmRequest<'a> {
    pub fn new(system: &'a str, user: &'a str) -> Self {
        Self {
            system,
            user,
            temperature: 0.2,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Response from LLM including content and usage stats
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
}

/// Chat model backend shared by the agents.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest<'_>) -> anyhow::Result<LlmResponse>;

    /// Model identifier recorded in the experiment log.
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client for OpenRouter and other OpenAI-compatible endpoints
pub struct OpenRouterClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenRouterClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    /// Includes automatic retry with exponential backoff for rate limits
    async fn complete(&self, request: &LlmRequest<'_>) -> anyhow::Result<LlmResponse> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: request.system,
                },
                Message {
                    role: "user",
                    content: request.user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: request.temperature,
            stream: false,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("X-Title", "refactor-swarm")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to parse chat completion response: {}\n{}",
                        e,
                        truncate_str(&text, 500)
                    )
                })?;

                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                debug!(chars = content.len(), model = %self.model, "LLM response received");

                return Ok(LlmResponse {
                    content,
                    usage: parsed.usage,
                    model: parsed.model.unwrap_or_else(|| self.model.clone()),
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });

                warn!(
                    "Rate limited. Retrying in {}s (attempt {}/{})",
                    retry_after, retry_count, MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            // Non-retryable error or max retries exceeded
            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Check the configured API key variable.".to_string(),
                429 => format!(
                    "Rate limited after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "LLM server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate_str(&text, 200)),
            };
            return Err(anyhow::anyhow!("{}", error_msg));
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Extract a retry-after hint ("retry after X seconds") from an error body
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    let after_retry = &text_lower[pos..];
    for word in after_retry.split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word
            .trim_matches(|c: char| !c.is_numeric())
            .parse::<u64>()
        {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
