//! LLM client module for the judge and the reassignment advisor.
//!
//! Two layers:
//! - [`LlmClient`]: chat-completion transport (OpenRouter is the implementation).
//! - [`Completer`]: the narrow capability the verification loop consumes,
//!   `complete(system, user) -> text`, bounded by a cancellation token.

mod error;
mod openrouter;

pub use error::{LlmError, RetryConfig};
pub use openrouter::OpenRouterClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    /// Create a simple text message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: Some(content.into()),
        }
    }
}

/// Response from a chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

/// Token usage information (if provided by the upstream provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Optional parameters for chat completions.
///
/// These are intentionally conservative; the goal is reproducibility.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Sampling temperature (0 = deterministic).
    pub temperature: Option<f64>,
    /// Maximum output tokens to generate.
    pub max_tokens: Option<u64>,
}

/// Trait for LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request with optional parameters.
    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse>;

    /// Send a chat completion request with default options.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion_with_options(model, messages, ChatOptions::default())
            .await
    }
}

/// Text-in, text-out completion capability used by the judge and the advisor.
///
/// The response may be wrapped in markdown code fencing; callers strip it.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Complete `user` under `system`.
    ///
    /// # Errors
    /// Transport failures, and cancellation of `cancel` (the call is abandoned
    /// as soon as the token fires).
    async fn complete(
        &self,
        cancel: &CancellationToken,
        system: &str,
        user: &str,
    ) -> anyhow::Result<String>;
}

/// [`Completer`] backed by an [`LlmClient`] and a fixed model.
pub struct ModelCompleter {
    llm: Arc<dyn LlmClient>,
    model: String,
    options: ChatOptions,
}

impl ModelCompleter {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            options: ChatOptions {
                temperature: Some(0.0),
                max_tokens: Some(1500),
            },
        }
    }

    /// Override sampling options.
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Completer for ModelCompleter {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        system: &str,
        user: &str,
    ) -> anyhow::Result<String> {
        let messages = [
            ChatMessage::new(Role::System, system),
            ChatMessage::new(Role::User, user),
        ];

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("completion cancelled"),
            response = self.llm.chat_completion_with_options(&self.model, &messages, self.options.clone()) => response?,
        };

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                total_tokens = usage.total_tokens,
                "Completion finished"
            );
        }

        response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Empty completion from {}", self.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingClient {
        seen: Mutex<Vec<(String, usize)>>,
        reply: Option<String>,
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn chat_completion_with_options(
            &self,
            model: &str,
            messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> anyhow::Result<ChatResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((model.to_string(), messages.len()));
            Ok(ChatResponse {
                content: self.reply.clone(),
                finish_reason: Some("stop".to_string()),
                usage: Some(TokenUsage::new(10, 5)),
                model: Some(model.to_string()),
            })
        }
    }

    #[tokio::test]
    async fn model_completer_sends_system_and_user() {
        let client = Arc::new(RecordingClient {
            seen: Mutex::new(Vec::new()),
            reply: Some("ok".to_string()),
        });
        let completer = ModelCompleter::new(client.clone(), "test/model");

        let out = completer
            .complete(&CancellationToken::new(), "sys", "usr")
            .await
            .unwrap();

        assert_eq!(out, "ok");
        assert_eq!(
            client.seen.lock().unwrap().as_slice(),
            &[("test/model".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn model_completer_rejects_empty_content() {
        let client = Arc::new(RecordingClient {
            seen: Mutex::new(Vec::new()),
            reply: Some("   ".to_string()),
        });
        let completer = ModelCompleter::new(client, "test/model");
        assert!(completer
            .complete(&CancellationToken::new(), "sys", "usr")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn model_completer_stops_when_cancelled() {
        let client = Arc::new(RecordingClient {
            seen: Mutex::new(Vec::new()),
            reply: Some("late".to_string()),
        });
        let completer = ModelCompleter::new(client, "test/model");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = completer.complete(&cancel, "sys", "usr").await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn token_usage_total_is_consistent() {
        let usage = TokenUsage::new(u64::MAX, 1);
        assert_eq!(usage.total_tokens, u64::MAX);
    }
}
