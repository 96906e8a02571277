//! Chat completion cog.

use async_trait::async_trait;
use cogflow_abstraction::{
    ChatMessage, ChatModel, Cog, CogError, CogKind, CompletionParams, TokenUsage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Prompt for one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInput {
    /// User prompt.
    pub prompt: String,
}

impl ChatInput {
    /// Wraps a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into() }
    }
}

/// Model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOutput {
    /// Reply text.
    pub response: String,
    /// Model that answered.
    pub model_id: String,
    /// Token accounting, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Sends a prompt to a chat model.
#[derive(Clone)]
pub struct ChatCog {
    model: Arc<dyn ChatModel>,
    system_prompt: Option<String>,
    params: CompletionParams,
}

impl std::fmt::Debug for ChatCog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCog")
            .field("model_id", &self.model.model_id())
            .field("system_prompt", &self.system_prompt)
            .field("params", &self.params)
            .finish()
    }
}

impl ChatCog {
    /// A chat cog backed by `model`.
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model, system_prompt: None, params: CompletionParams::default() }
    }

    /// Prepends a system message to every conversation.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Generation parameters.
    #[must_use]
    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }
}

#[async_trait]
impl Cog for ChatCog {
    type Input = ChatInput;
    type Output = ChatOutput;

    fn kind(&self) -> CogKind {
        CogKind::Chat
    }

    async fn invoke(&self, input: ChatInput) -> Result<ChatOutput, CogError> {
        if input.prompt.trim().is_empty() {
            return Err(CogError::InvalidInput("prompt is empty".to_string()));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(input.prompt));

        debug!(model_id = %self.model.model_id(), "Requesting chat completion");

        let completion = self.model.complete(&messages, &self.params).await?;
        Ok(ChatOutput {
            response: completion.content,
            model_id: completion.model_id,
            usage: completion.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockModel;

    #[tokio::test]
    async fn test_chat_cog_returns_model_reply() {
        let cog = ChatCog::new(Arc::new(MockModel::new("m1")));
        let output = cog.invoke(ChatInput::new("summarize this")).await.unwrap();
        assert_eq!(output.response, "mock: summarize this");
        assert_eq!(output.model_id, "m1");
        assert!(output.usage.is_some());
    }

    #[tokio::test]
    async fn test_chat_cog_system_prompt_counts_toward_usage() {
        let plain = ChatCog::new(Arc::new(MockModel::default()));
        let framed = plain.clone().with_system_prompt("you are terse");

        let a = plain.invoke(ChatInput::new("hi")).await.unwrap();
        let b = framed.invoke(ChatInput::new("hi")).await.unwrap();
        assert_eq!(a.response, b.response);
        assert_eq!(b.usage.unwrap().prompt_tokens, a.usage.unwrap().prompt_tokens + 3);
    }

    #[tokio::test]
    async fn test_chat_cog_rejects_empty_prompt() {
        let cog = ChatCog::new(Arc::new(MockModel::default()));
        assert!(matches!(cog.invoke(ChatInput::new("")).await, Err(CogError::InvalidInput(_))));
    }
}
