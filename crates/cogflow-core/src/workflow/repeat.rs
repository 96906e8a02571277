//! Iterated execution of a named scope.
//!
//! Each iteration gets a fresh registry and sees the state produced by the
//! previous one. The loop ends when a step or the outputs hook raises
//! `break`, or when the iteration limit is reached.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::context::StepContext;
use super::declaration::IterationOutputs;
use super::registry::Registry;
use super::scheduler::Scheduler;
use crate::error::{EngineError, Result};
use crate::signal::{Signal, StepInterrupt, StepResult};

/// Configuration of a repeat step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatConfig {
    /// Stop after this many iterations. Falls back to the engine's
    /// `default_max_iterations`, then to no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

impl RepeatConfig {
    /// Repeat until a break.
    pub fn until_break() -> Self {
        Self::default()
    }

    /// Repeat at most `max` times.
    pub fn max_iterations(max: usize) -> Self {
        Self { max_iterations: Some(max) }
    }
}

/// One finished iteration.
#[derive(Debug, Clone)]
pub struct CompletedIteration {
    index: usize,
    registry: Arc<Registry>,
    output: Option<Value>,
    broke: bool,
}

impl CompletedIteration {
    /// Zero-based iteration index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Sealed registry of the iteration.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Value collected by the outputs hook.
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Whether the loop stopped here because of a break.
    pub fn broke(&self) -> bool {
        self.broke
    }
}

/// Value of a repeat step.
#[derive(Debug, Clone)]
pub struct RepeatOutput {
    scope: String,
    final_state: Value,
    iterations: Vec<CompletedIteration>,
}

impl RepeatOutput {
    /// Scope that was iterated.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// State after the last iteration.
    pub fn final_state(&self) -> &Value {
        &self.final_state
    }

    /// Iterations in execution order.
    pub fn iterations(&self) -> &[CompletedIteration] {
        &self.iterations
    }

    /// Number of iterations that ran.
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    /// Collected outputs in iteration order, leaving out iterations that
    /// produced none.
    pub fn outputs(&self) -> Vec<&Value> {
        self.iterations.iter().filter_map(CompletedIteration::output).collect()
    }

    /// Whether the loop ended on a break rather than the limit.
    pub fn broke(&self) -> bool {
        self.iterations.last().is_some_and(CompletedIteration::broke)
    }

    /// The value of step `name` in every iteration, `None` where it did not
    /// complete.
    pub fn step_outputs<T: Any + Send + Sync>(&self, name: &str) -> Result<Vec<Option<Arc<T>>>> {
        self.iterations.iter().map(|iteration| iteration.registry.output::<T>(name)).collect()
    }
}

/// Drives a scope through its iterations.
#[derive(Debug, Clone, Default)]
pub struct RepeatController {
    config: RepeatConfig,
}

impl RepeatController {
    /// A controller with the given limits.
    pub fn new(config: RepeatConfig) -> Self {
        Self { config }
    }

    /// Runs `scope_name` starting from the state `initial_state` resolves
    /// to.
    ///
    /// Per iteration: walk, outputs hook, barrier, seal. A `break` from a
    /// synchronous step skips the outputs hook, so that iteration collects
    /// nothing and the state stays as it was going in. A `break` from a
    /// background step is only seen at the barrier, after the hook ran.
    pub async fn run<Fut>(
        &self,
        ctx: &StepContext,
        scope_name: &str,
        initial_state: Fut,
    ) -> StepResult<RepeatOutput>
    where
        Fut: Future<Output = StepResult<Value>> + Send,
    {
        let scope = ctx.scope(scope_name)?;
        let hook = scope.outputs_hook();
        let max_iterations = self.config.max_iterations.or(ctx.config().default_max_iterations);
        if max_iterations == Some(0) {
            warn!(scope = %scope_name, "max_iterations of 0 still runs one iteration");
        }

        let mut state = initial_state.await?;
        let mut iterations = Vec::new();

        info!(
            run_id = %ctx.run_id(),
            scope = %scope_name,
            max_iterations = ?max_iterations,
            "Starting repeat"
        );

        let mut index = 0;
        loop {
            let registry = Arc::new(Registry::for_iteration(scope_name, index));
            let iteration_ctx = ctx.for_iteration(Arc::clone(&registry), index, state.clone());

            let mut broke = Scheduler::walk(&scope, &iteration_ctx).await?.is_break();
            let mut output = None;

            if !broke && let Some(hook) = &hook {
                match hook(iteration_ctx.clone()).await {
                    Ok(IterationOutputs { state: next, output: collected }) => {
                        state = next;
                        output = collected;
                    }
                    Err(StepInterrupt::Signal(Signal::Skip { .. })) => {}
                    Err(
                        StepInterrupt::Signal(Signal::Break { .. })
                        | StepInterrupt::Error(EngineError::StepBroke { .. }),
                    ) => broke = true,
                    Err(StepInterrupt::Signal(Signal::Fail { message })) => {
                        let step = format!("{}.outputs", scope_name);
                        let cause = EngineError::FatalAbort { step: step.clone(), message };
                        return Err(EngineError::step_failed(step, Arc::new(cause)).into());
                    }
                    Err(StepInterrupt::Error(err)) => {
                        let step = format!("{}.outputs", scope_name);
                        return Err(EngineError::step_failed(step, Arc::new(err)).into());
                    }
                }
            }

            broke |= Scheduler::settle(&iteration_ctx).await?.is_break();
            registry.seal();

            debug!(
                scope = %scope_name,
                iteration = index,
                broke,
                collected = output.is_some(),
                "Iteration finished"
            );

            iterations.push(CompletedIteration { index, registry, output, broke });

            if broke || max_iterations.is_some_and(|max| index + 1 >= max) {
                break;
            }
            index += 1;
        }

        info!(
            run_id = %ctx.run_id(),
            scope = %scope_name,
            iterations = iterations.len(),
            "Repeat finished"
        );

        Ok(RepeatOutput { scope: scope_name.to_string(), final_state: state, iterations })
    }
}
