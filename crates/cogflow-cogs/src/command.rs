//! Shell command cog.

use async_trait::async_trait;
use cogflow_abstraction::{Cog, CogError, CogKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInput {
    /// Command line handed to `sh -c`.
    pub command: String,
    /// Working directory; inherits the process directory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CommandInput {
    /// Input for a bare command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), ..Self::default() }
    }

    /// Runs the command in `dir`.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit status, or -1 when terminated by a signal.
    pub status: i32,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs shell commands.
#[derive(Debug, Clone, Default)]
pub struct CommandCog {
    allow_failure: bool,
}

impl CommandCog {
    /// A command cog that treats non-zero exits as errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps non-zero exits as ordinary outputs instead of errors.
    #[must_use]
    pub fn allow_failure(mut self, allow: bool) -> Self {
        self.allow_failure = allow;
        self
    }
}

#[async_trait]
impl Cog for CommandCog {
    type Input = CommandInput;
    type Output = CommandOutput;

    fn kind(&self) -> CogKind {
        CogKind::Command
    }

    async fn invoke(&self, input: CommandInput) -> Result<CommandOutput, CogError> {
        if input.command.trim().is_empty() {
            return Err(CogError::InvalidInput("command is empty".to_string()));
        }

        debug!(command = %input.command, "Running shell command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&input.command);
        if let Some(dir) = &input.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&input.env);

        let output = cmd
            .output()
            .await
            .map_err(|e| CogError::Process(format!("failed to run '{}': {}", input.command, e)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };

        if !result.success() && !self.allow_failure {
            warn!(command = %input.command, status = result.status, "Shell command failed");
            return Err(CogError::CommandFailed {
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_command_captures_stdout() {
        let output = CommandCog::new().invoke(CommandInput::new("echo hello")).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_command_failure_is_error() {
        let result = CommandCog::new().invoke(CommandInput::new("echo oops >&2; exit 3")).await;
        match result {
            Err(CogError::CommandFailed { status, stderr }) => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_allow_failure() {
        let output = CommandCog::new()
            .allow_failure(true)
            .invoke(CommandInput::new("exit 4"))
            .await
            .unwrap();
        assert_eq!(output.status, 4);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_command_working_dir_and_env() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("marker.txt"), "present").unwrap();

        let input = CommandInput::new("cat marker.txt; printf \" $GREETING\"")
            .in_dir(temp_dir.path())
            .with_env("GREETING", "hi");
        let output = CommandCog::new().invoke(input).await.unwrap();
        assert_eq!(output.stdout, "present hi");
    }

    #[tokio::test]
    async fn test_command_rejects_empty_input() {
        let result = CommandCog::new().invoke(CommandInput::new("   ")).await;
        assert!(matches!(result, Err(CogError::InvalidInput(_))));
    }
}
