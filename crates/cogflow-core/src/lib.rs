//! Cogflow Core - workflow execution engine.
//!
//! This crate evaluates workflows made of named steps ("cogs"):
//! - declarations run in document order, synchronous ones to completion and
//!   background ones on their own tasks
//! - steps read each other lazily by name through [`StepContext`], either
//!   forcing evaluation or peeking at whatever is already there
//! - `skip`, `break` and `fail` signals steer control flow out of step bodies
//! - `repeat` drives a named scope through iterations, threading state
//!
//! # Example
//!
//! ```rust,no_run
//! use cogflow_core::{Step, Workflow};
//!
//! #[tokio::main]
//! async fn main() -> cogflow_core::Result<()> {
//!     let mut workflow = Workflow::new("word-count");
//!     workflow.step(
//!         Step::compute(|ctx| async move {
//!             Ok(ctx.target().unwrap_or_default().to_string())
//!         })
//!         .named("fetch_url"),
//!     )?;
//!     workflow.step(
//!         Step::compute(|ctx| async move {
//!             let page = ctx.require::<String>("fetch_url").await?;
//!             Ok(page.split_whitespace().count())
//!         })
//!         .named("count_words"),
//!     )?;
//!
//!     let report = workflow.run(Some("a few words".to_string())).await?;
//!     assert_eq!(report.output::<usize>("count_words")?.as_deref(), Some(&3));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod signal;
pub mod workflow;

pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, Result};
pub use signal::{Signal, StepInterrupt, StepResult, break_loop, fail, skip};
pub use workflow::{
    CompletedIteration, ExecutionMode, IterationOutputs, Output, Registry, RepeatConfig,
    RepeatController, RepeatOutput, RunOutcome, RunReport, RunSummary, Scheduler, Scope, Step,
    StepContext, StepDeclaration, StepKind, StepRecord, StepStatus, StepSummary, Workflow,
};

pub use cogflow_abstraction::{Cog, CogError, CogKind};
