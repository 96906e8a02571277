//! The uniform `invoke(input) -> output` contract shared by every cog kind.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The family a cog belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CogKind {
    /// Plain in-process computation.
    Compute,
    /// Shell command execution.
    Command,
    /// Chat completion against a language model.
    Chat,
    /// Autonomous coding agent invocation.
    Agent,
}

impl CogKind {
    /// Short lowercase label, used for generated step names and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Command => "cmd",
            Self::Chat => "chat",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for CogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a cog while performing its side effect.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CogError {
    /// The cog input was rejected before anything ran.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A spawned process could not be started or waited on.
    #[error("Process error: {0}")]
    Process(String),

    /// A command ran but exited unsuccessfully.
    #[error("Command exited with status {status}: {stderr}")]
    CommandFailed {
        /// Exit status, or -1 when terminated by a signal.
        status: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// The language model returned an error.
    #[error("Model error: {0}")]
    Model(String),

    /// Anything else.
    #[error("Cog error: {0}")]
    Other(String),
}

/// A named unit of work the engine can schedule.
///
/// Inputs and outputs are owned values so that invocations can move onto
/// background tasks. Implementations must be `Send + Sync` because one cog
/// instance may be shared by several concurrently running steps.
#[async_trait]
pub trait Cog: Send + Sync {
    /// Input accepted by [`Cog::invoke`].
    type Input: Send + 'static;
    /// Output produced by [`Cog::invoke`].
    type Output: Send + Sync + 'static;

    /// The cog family, used for step naming and reporting.
    fn kind(&self) -> CogKind;

    /// Performs the side effect.
    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, CogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    #[async_trait]
    impl Cog for Doubler {
        type Input = u32;
        type Output = u32;

        fn kind(&self) -> CogKind {
            CogKind::Compute
        }

        async fn invoke(&self, input: u32) -> Result<u32, CogError> {
            input.checked_mul(2).ok_or_else(|| CogError::InvalidInput("overflow".to_string()))
        }
    }

    #[test]
    fn test_cog_kind_labels() {
        assert_eq!(CogKind::Command.as_str(), "cmd");
        assert_eq!(CogKind::Chat.to_string(), "chat");
        assert_eq!(CogKind::Agent.to_string(), "agent");
    }

    #[test]
    fn test_cog_kind_serde() {
        let json = serde_json::to_string(&CogKind::Command).unwrap();
        assert_eq!(json, "\"command\"");
        let kind: CogKind = serde_json::from_str("\"agent\"").unwrap();
        assert_eq!(kind, CogKind::Agent);
    }

    #[test]
    fn test_command_failed_display() {
        let err = CogError::CommandFailed { status: 2, stderr: "no such file".to_string() };
        assert_eq!(err.to_string(), "Command exited with status 2: no such file");
    }

    #[tokio::test]
    async fn test_invoke_through_trait() {
        let cog = Doubler;
        assert_eq!(cog.invoke(21).await.unwrap(), 42);
        assert!(matches!(cog.invoke(u32::MAX).await, Err(CogError::InvalidInput(_))));
    }
}
