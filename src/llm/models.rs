use serde::{Deserialize, Serialize};

/// Default chat model (OpenRouter id)
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-lite";

/// Maximum completion tokens requested per call
pub const DEFAULT_MAX_TOKENS: u32 = 16384;

/// Sampling temperature per agent role
pub const AUDITOR_TEMPERATURE: f32 = 0.1;
pub const FIXER_TEMPERATURE: f32 = 0.2;
pub const JUDGE_TEMPERATURE: f32 = 0.1;

/// API usage information from the chat completions endpoint
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    /// Cost in USD when the provider reports it (`total_cost` on OpenRouter).
    #[serde(default, alias = "total_cost")]
    pub cost: Option<f64>,
}

impl Usage {
    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_returns_zero_when_no_cost() {
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 1000,
            total_tokens: 2000,
            cost: None,
        };
        assert_eq!(usage.cost(), 0.0);
    }

    #[test]
    fn test_usage_deserialize_with_total_cost() {
        let json = r#"{"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150, "total_cost": 0.0025}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.cost(), 0.0025);
    }
}
