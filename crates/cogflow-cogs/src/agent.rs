//! Autonomous agent cog.
//!
//! Agents are external programs (a coding assistant CLI, for instance) that
//! take a prompt on stdin and print their final answer on stdout.

use async_trait::async_trait;
use cogflow_abstraction::{Cog, CogError, CogKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Task for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInput {
    /// Prompt written to the agent's stdin.
    pub prompt: String,
    /// Directory the agent works in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl AgentInput {
    /// Wraps a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), working_dir: None }
    }

    /// Runs the agent in `dir`.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Agent answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Final answer printed by the agent, trimmed.
    pub response: String,
    /// Diagnostics printed by the agent.
    pub stderr: String,
}

/// Invokes an external agent program.
#[derive(Debug, Clone)]
pub struct AgentCog {
    program: String,
    args: Vec<String>,
}

impl AgentCog {
    /// An agent cog running `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// The program this cog launches.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for AgentCog {
    /// Claude's non-interactive print mode.
    fn default() -> Self {
        Self::new("claude", vec!["-p".to_string()])
    }
}

#[async_trait]
impl Cog for AgentCog {
    type Input = AgentInput;
    type Output = AgentOutput;

    fn kind(&self) -> CogKind {
        CogKind::Agent
    }

    async fn invoke(&self, input: AgentInput) -> Result<AgentOutput, CogError> {
        debug!(program = %self.program, prompt_len = input.prompt.len(), "Invoking agent");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &input.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CogError::Process(format!("failed to spawn {}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CogError::Process("agent stdin unavailable".to_string()))?;
        stdin
            .write_all(input.prompt.as_bytes())
            .await
            .map_err(|e| CogError::Process(format!("failed to write prompt: {}", e)))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CogError::Process(format!("failed to wait for agent: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let status = output.status.code().unwrap_or(-1);
            warn!(program = %self.program, status, "Agent exited unsuccessfully");
            return Err(CogError::CommandFailed { status, stderr });
        }

        Ok(AgentOutput { response: String::from_utf8_lossy(&output.stdout).trim().to_string(), stderr })
    }
}
