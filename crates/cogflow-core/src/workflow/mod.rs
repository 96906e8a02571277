//! Workflow declaration, scheduling and execution.

mod context;
mod declaration;
mod engine;
mod record;
mod registry;
mod repeat;
mod scheduler;

pub use context::StepContext;
pub use declaration::{
    IterationOutputs, OutputsBody, OutputsFuture, Scope, Step, StepBody, StepDeclaration,
    StepFuture,
};
pub use engine::{RunReport, RunSummary, Workflow};
pub use record::{ExecutionMode, Output, StepKind, StepRecord, StepStatus, StepSummary};
pub use registry::Registry;
pub use repeat::{CompletedIteration, RepeatConfig, RepeatController, RepeatOutput};
pub use scheduler::{RunOutcome, Scheduler};
