//! Cog abstraction layer for Cogflow.
//!
//! The workflow engine never performs side effects itself. Everything it
//! schedules reaches the outside world through the [`Cog`] contract defined
//! here, and chat cogs in turn reach a language model through [`ChatModel`].

mod cog;
mod model;

pub use cog::{Cog, CogError, CogKind};
pub use model::{ChatMessage, ChatModel, ChatRole, Completion, CompletionParams, TokenUsage};
