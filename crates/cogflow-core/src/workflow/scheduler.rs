//! Evaluation of a scope's declarations against a registry.
//!
//! A scope is evaluated in two phases:
//! - **walk** visits declarations in order. Synchronous steps run inline and
//!   the walk waits for them; background steps are spawned and the walk moves
//!   on. A step already finished (because another step forced it) is
//!   observed, never run twice.
//! - **settle** is the barrier that awaits every background step of the
//!   registry and surfaces their failures and breaks.
//!
//! Forcing reads from [`StepContext::require`] re-enter this module through
//! [`force`], so a step can be evaluated earlier than its declaration order.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::StepContext;
use super::declaration::Scope;
use super::record::{ExecutionMode, Slot, StepRecord, StepStatus};
use crate::error::{EngineError, Result};
use crate::signal::{Signal, StepInterrupt};

/// How a scope evaluation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every declaration was visited.
    Finished,
    /// A step raised `break`.
    Broke {
        /// Step that raised it.
        step: String,
    },
}

impl RunOutcome {
    /// Whether a break was observed.
    pub fn is_break(&self) -> bool {
        matches!(self, Self::Broke { .. })
    }
}

/// Drives a scope's declarations through their step records.
pub struct Scheduler;

impl Scheduler {
    /// Walks `scope` and then waits for its background steps.
    pub async fn run(scope: &Scope, ctx: &StepContext) -> Result<RunOutcome> {
        let walked = Self::walk(scope, ctx).await?;
        let settled = Self::settle(ctx).await?;
        Ok(if walked.is_break() { walked } else { settled })
    }

    /// Registers every declaration and visits them in order.
    ///
    /// Returns at the first synchronous failure or break; the remaining
    /// declarations stay Pending.
    pub async fn walk(scope: &Scope, ctx: &StepContext) -> Result<RunOutcome> {
        let registry = ctx.registry();
        let records = scope
            .declarations()
            .iter()
            .map(|declaration| registry.register(declaration))
            .collect::<Result<Vec<_>>>()?;

        for record in records {
            match record.mode() {
                ExecutionMode::Async => start_background(&record, ctx),
                ExecutionMode::Sync => match evaluate_inline(&record, ctx).await {
                    Slot::Completed(_) | Slot::Skipped { broke: false, .. } => {}
                    Slot::Skipped { broke: true, .. } => return on_break(&record, ctx),
                    Slot::Failed(cause) => {
                        warn_detached(ctx);
                        return Err(EngineError::step_failed(record.name(), cause));
                    }
                    Slot::Pending | Slot::Running => {
                        return Err(EngineError::Internal(format!(
                            "step '{}' left the walk unfinished",
                            record.name()
                        )));
                    }
                },
            }
        }

        Ok(RunOutcome::Finished)
    }

    /// Waits for every started background step of the registry.
    ///
    /// Failures abort with `StepFailed` for the first failed step in
    /// declaration order. Background steps the walk never reached are left
    /// Pending.
    pub async fn settle(ctx: &StepContext) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::Finished;

        for record in ctx.registry().records() {
            if record.mode() != ExecutionMode::Async || record.status() == StepStatus::Pending {
                continue;
            }
            match record.wait().await {
                Slot::Failed(cause) => {
                    warn_detached(ctx);
                    return Err(EngineError::step_failed(record.name(), cause));
                }
                Slot::Skipped { broke: true, .. } if !outcome.is_break() => {
                    outcome = on_break(&record, ctx)?;
                }
                _ => {}
            }
        }

        Ok(outcome)
    }
}

/// Background steps still running when their scope aborts keep running;
/// their results are never read.
fn warn_detached(ctx: &StepContext) {
    for record in ctx.registry().records() {
        if record.has_task() && record.status() == StepStatus::Running {
            warn!(scope = %ctx.registry().scope(), step = %record.name(), "Detaching background step");
        }
    }
}

fn on_break(record: &StepRecord, ctx: &StepContext) -> Result<RunOutcome> {
    if ctx.iteration().is_none() {
        return Err(EngineError::BreakOutsideRepeat { step: record.name().to_string() });
    }
    debug!(
        scope = %ctx.registry().scope(),
        iteration = ?ctx.iteration(),
        step = %record.name(),
        "Break raised"
    );
    Ok(RunOutcome::Broke { step: record.name().to_string() })
}

/// Evaluates the record for a forcing read.
pub(crate) async fn force(record: &Arc<StepRecord>, ctx: &StepContext) -> Slot {
    match record.mode() {
        ExecutionMode::Sync => evaluate_inline(record, ctx).await,
        ExecutionMode::Async => {
            start_background(record, ctx);
            record.wait().await
        }
    }
}

/// Runs the record on the current task unless someone else already claimed
/// it, in which case this waits for their result.
async fn evaluate_inline(record: &Arc<StepRecord>, ctx: &StepContext) -> Slot {
    if record.try_begin() {
        let slot = execute(record, ctx).await;
        record.finish(slot.clone());
        slot
    } else {
        record.wait().await
    }
}

/// Spawns the record's body on a new task if it is still Pending.
///
/// With `max_concurrent_async` configured, the task holds a semaphore permit
/// while the body runs. A background step forcing another background step
/// under a cap of one therefore waits forever.
fn start_background(record: &Arc<StepRecord>, ctx: &StepContext) {
    if !record.try_begin() {
        return;
    }

    let task_record = Arc::clone(record);
    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        let _permit = match task_ctx.limiter() {
            Some(limiter) => limiter.acquire_owned().await.ok(),
            None => None,
        };
        let slot = execute(&task_record, &task_ctx).await;
        task_record.finish(slot);
    });
    record.set_handle(handle);
}

/// Runs the body and maps its result to a terminal slot.
async fn execute(record: &StepRecord, ctx: &StepContext) -> Slot {
    let step_ctx = ctx.entering(record.name());
    let body = record.body();

    debug!(
        scope = %ctx.registry().scope(),
        iteration = ?ctx.iteration(),
        step = %record.name(),
        kind = %record.kind(),
        "Step started"
    );

    let result = AssertUnwindSafe(async move { body(step_ctx).await }).catch_unwind().await;
    let slot = match result {
        Ok(Ok(output)) => Slot::Completed(output),
        Ok(Err(StepInterrupt::Signal(Signal::Skip { reason }))) => {
            Slot::Skipped { reason, broke: false }
        }
        Ok(Err(StepInterrupt::Signal(Signal::Break { reason }))) => {
            Slot::Skipped { reason, broke: true }
        }
        Ok(Err(StepInterrupt::Error(EngineError::StepBroke { step }))) => {
            Slot::Skipped { reason: Some(format!("step '{}' broke", step)), broke: true }
        }
        Ok(Err(StepInterrupt::Signal(Signal::Fail { message }))) => {
            Slot::Failed(Arc::new(EngineError::FatalAbort { step: record.name().to_string(), message }))
        }
        Ok(Err(StepInterrupt::Error(err))) => Slot::Failed(Arc::new(err)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(step = %record.name(), %message, "Step panicked");
            Slot::Failed(Arc::new(EngineError::Panicked { step: record.name().to_string(), message }))
        }
    };

    debug!(
        scope = %ctx.registry().scope(),
        iteration = ?ctx.iteration(),
        step = %record.name(),
        status = %slot.status(),
        "Step finished"
    );
    slot
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::workflow::context::RunContext;
    use crate::workflow::declaration::Step;
    use crate::workflow::registry::Registry;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn root_context() -> StepContext {
        let run = Arc::new(RunContext::new(None, HashMap::new(), EngineConfig::default()));
        StepContext::root(run, Arc::new(Registry::new("main")))
    }

    #[tokio::test]
    async fn test_walk_runs_sync_steps_in_order() {
        let mut scope = Scope::new("main");
        scope.add(Step::compute(|_| async { Ok(1_u32) }).named("a")).unwrap();
        scope.add(Step::compute(|_| async { Ok(2_u32) }).named("b")).unwrap();
        let ctx = root_context();

        let outcome = Scheduler::run(&scope, &ctx).await.unwrap();

        assert_eq!(outcome, RunOutcome::Finished);
        let a = ctx.registry().get("a").unwrap();
        let b = ctx.registry().get("b").unwrap();
        assert!(a.start_sequence() < b.start_sequence());
        assert_eq!(*ctx.peek::<u32>("b").unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_forced_step_is_not_rerun() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut scope = Scope::new("main");
        scope
            .add(Step::compute(|ctx| async move { Ok(*ctx.require::<u32>("late").await? * 2) }).named("early"))
            .unwrap();
        scope
            .add(
                Step::compute(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(21_u32)
                    }
                })
                .named("late"),
            )
            .unwrap();
        let ctx = root_context();

        Scheduler::run(&scope, &ctx).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*ctx.peek::<u32>("early").unwrap().unwrap(), 42);
        let late = ctx.registry().get("late").unwrap();
        let early = ctx.registry().get("early").unwrap();
        assert!(early.start_sequence() < late.start_sequence());
    }

    #[tokio::test]
    async fn test_break_at_top_level_is_an_error() {
        let mut scope = Scope::new("main");
        scope.add(Step::compute(|_| async { Err::<(), _>(crate::break_loop("stop")) }).named("stopper")).unwrap();
        scope.add(Step::compute(|_| async { Ok(()) }).named("after")).unwrap();
        let ctx = root_context();

        let result = Scheduler::run(&scope, &ctx).await;

        assert!(matches!(result, Err(EngineError::BreakOutsideRepeat { step }) if step == "stopper"));
        assert_eq!(ctx.registry().status("after"), Some(StepStatus::Pending));
    }

    #[tokio::test]
    async fn test_panicking_background_step_fails_at_barrier() {
        let mut scope = Scope::new("main");
        scope
            .add(
                Step::compute(|_| async {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(())
                })
                .named("bomb")
                .background(),
            )
            .unwrap();
        let ctx = root_context();

        let result = Scheduler::run(&scope, &ctx).await;

        let Err(err) = result else { panic!("expected failure") };
        assert_eq!(err.root_step(), Some("bomb"));
        assert!(matches!(err.root_cause(), EngineError::Panicked { message, .. } if message == "kaboom"));
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&5_u8), "non-string panic payload");
    }
}
