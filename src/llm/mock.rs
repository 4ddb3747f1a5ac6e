//! Scripted in-memory model for agent and swarm tests

use super::client::{LlmClient, LlmRequest, LlmResponse};
use super::models::Usage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A prompt the mock received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub user: String,
}

/// Replies come from a queue; once it is empty the fallback (if any) repeats.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<String>,
    usage: Option<Usage>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            usage: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call gets `reply`.
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(Vec::<String>::new()).with_fallback(reply)
    }

    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Attach `usage` to every reply.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Queue a transport failure.
    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest<'_>) -> anyhow::Result<LlmResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            system: request.system.to_string(),
            user: request.user.to_string(),
        });

        let next = self.replies.lock().unwrap().pop_front();
        let content = match next {
            Some(Ok(reply)) => reply,
            Some(Err(message)) => anyhow::bail!("{}", message),
            None => match &self.fallback {
                Some(reply) => reply.clone(),
                None => anyhow::bail!("scripted LLM has no reply left"),
            },
        };
        Ok(LlmResponse {
            content,
            usage: self.usage.clone(),
            model: "scripted".to_string(),
        })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
