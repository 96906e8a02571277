//! Cog implementations for Cogflow.
//!
//! Each cog here implements [`cogflow_abstraction::Cog`] and is otherwise
//! unknown to the engine.
//!
//! # Provided cogs
//!
//! - **Command**: shell commands through `sh -c`
//! - **Chat**: one chat completion through any [`ChatModel`]
//! - **Agent**: an external coding agent process fed a prompt on stdin
//! - **Mock**: a deterministic [`ChatModel`] for development and tests

pub mod agent;
pub mod chat;
pub mod command;
pub mod mock;

pub use agent::{AgentCog, AgentInput, AgentOutput};
pub use chat::{ChatCog, ChatInput, ChatOutput};
pub use command::{CommandCog, CommandInput, CommandOutput};
pub use mock::MockModel;

pub use cogflow_abstraction::{ChatModel, Cog, CogError, CogKind};
