//! Deterministic chat model.

use async_trait::async_trait;
use cogflow_abstraction::{
    ChatMessage, ChatModel, ChatRole, CogError, Completion, CompletionParams, TokenUsage,
};
use tracing::debug;

/// A mock implementation of [`ChatModel`] for testing and demonstration.
///
/// Replies with `"<prefix><last user message>"`.
#[derive(Debug, Clone)]
pub struct MockModel {
    id: String,
    prefix: String,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), prefix: "mock: ".to_string() }
    }

    /// Overrides the reply prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<Completion, CogError> {
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            params = ?params,
            "MockModel completing chat"
        );

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .ok_or_else(|| CogError::Model("conversation has no user message".to_string()))?;

        let content = format!("{}{}", self.prefix, last_user.content);
        let prompt_tokens = messages.iter().map(|m| count_tokens(&m.content)).sum::<u32>();
        let completion_tokens = count_tokens(&content);

        Ok(Completion {
            content,
            model_id: self.id.clone(),
            usage: Some(TokenUsage { prompt_tokens, completion_tokens }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
