//! Lazy accessors handed to step bodies.
//!
//! A [`StepContext`] is bound to one registry. `require` forces the named
//! step (running it now, starting it, or waiting for it) and returns its
//! value; `peek` returns whatever is already there without forcing.

use serde_json::Value;
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::declaration::Scope;
use super::record::{Slot, StepRecord, StepStatus};
use super::registry::Registry;
use super::scheduler;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Per-run state shared by every context of the run.
pub(crate) struct RunContext {
    pub(crate) run_id: Uuid,
    pub(crate) target: Option<String>,
    pub(crate) scopes: HashMap<String, Arc<Scope>>,
    pub(crate) config: EngineConfig,
    pub(crate) limiter: Option<Arc<Semaphore>>,
}

impl RunContext {
    pub(crate) fn new(
        target: Option<String>,
        scopes: HashMap<String, Arc<Scope>>,
        config: EngineConfig,
    ) -> Self {
        let limiter = config.max_concurrent_async.map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self { run_id: Uuid::new_v4(), target, scopes, config, limiter }
    }
}

#[derive(Debug)]
struct IterationFrame {
    index: usize,
    state: Value,
}

/// Read access to the registry a step runs in.
#[derive(Clone)]
pub struct StepContext {
    run: Arc<RunContext>,
    registry: Arc<Registry>,
    frame: Option<Arc<IterationFrame>>,
    chain: Arc<Vec<String>>,
}

impl StepContext {
    pub(crate) fn root(run: Arc<RunContext>, registry: Arc<Registry>) -> Self {
        Self { run, registry, frame: None, chain: Arc::new(Vec::new()) }
    }

    /// Context for one repeat iteration. The evaluation chain restarts
    /// because names resolve against the new registry.
    pub(crate) fn for_iteration(&self, registry: Arc<Registry>, index: usize, state: Value) -> Self {
        Self {
            run: Arc::clone(&self.run),
            registry,
            frame: Some(Arc::new(IterationFrame { index, state })),
            chain: Arc::new(Vec::new()),
        }
    }

    /// Context seen by the body of `step`.
    pub(crate) fn entering(&self, step: &str) -> Self {
        let mut chain = Vec::with_capacity(self.chain.len() + 1);
        chain.extend(self.chain.iter().cloned());
        chain.push(step.to_string());
        Self { chain: Arc::new(chain), ..self.clone() }
    }

    /// Identifier of the current run.
    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    /// Target given to the run, if any.
    pub fn target(&self) -> Option<&str> {
        self.run.target.as_deref()
    }

    /// Current iteration index inside a repeat.
    pub fn iteration(&self) -> Option<usize> {
        self.frame.as_ref().map(|frame| frame.index)
    }

    /// State passed into the current iteration.
    pub fn state(&self) -> Option<&Value> {
        self.frame.as_ref().map(|frame| &frame.state)
    }

    /// Step whose body holds this context.
    pub fn step_name(&self) -> Option<&str> {
        self.chain.last().map(String::as_str)
    }

    /// Registry this context reads from.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Engine configuration of the run.
    pub fn config(&self) -> &EngineConfig {
        &self.run.config
    }

    /// Status of a step without forcing it.
    pub fn status(&self, name: &str) -> Result<StepStatus> {
        Ok(self.registry.lookup(name)?.status())
    }

    /// Forcing typed read.
    ///
    /// Evaluates the step if it has not started, waits if it is running,
    /// and then returns its value. A skipped step yields
    /// `StepNotAvailable`, a failed one `StepFailed`. A step that raised
    /// `break` yields `StepBroke`, which `?` turns back into a break of the
    /// reader.
    pub async fn require<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let record = self.registry.lookup(name)?;
        if self.chain.iter().any(|step| step == name) {
            let mut chain = self.chain.to_vec();
            chain.push(name.to_string());
            return Err(EngineError::DependencyCycle { chain });
        }

        let slot = scheduler::force(&record, self).await;
        match slot {
            Slot::Completed(output) => downcast(name, output),
            Slot::Skipped { broke: true, .. } => Err(EngineError::StepBroke { step: name.to_string() }),
            Slot::Skipped { broke: false, .. } => Err(EngineError::StepNotAvailable(name.to_string())),
            Slot::Failed(cause) => Err(EngineError::step_failed(name, cause)),
            Slot::Pending | Slot::Running => Err(EngineError::Internal(format!(
                "step '{}' was forced but did not finish",
                name
            ))),
        }
    }

    /// Non-forcing typed read.
    ///
    /// `Ok(None)` while the step is pending, running or skipped;
    /// `Err(StepFailed)` once it failed.
    pub fn peek<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>> {
        let record = self.registry.lookup(name)?;
        resolve_peek(&record)
    }

    pub(crate) fn scope(&self, name: &str) -> Result<Arc<Scope>> {
        self.run
            .scopes
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownScope(name.to_string()))
    }

    pub(crate) fn limiter(&self) -> Option<Arc<Semaphore>> {
        self.run.limiter.clone()
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("run_id", &self.run.run_id)
            .field("scope", &self.registry.scope())
            .field("iteration", &self.iteration())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

pub(crate) fn resolve_peek<T: Any + Send + Sync>(record: &StepRecord) -> Result<Option<Arc<T>>> {
    match record.snapshot() {
        Slot::Completed(output) => downcast(record.name(), output).map(Some),
        Slot::Failed(cause) => Err(EngineError::step_failed(record.name(), cause)),
        Slot::Pending | Slot::Running | Slot::Skipped { .. } => Ok(None),
    }
}

fn downcast<T: Any + Send + Sync>(name: &str, output: super::record::Output) -> Result<Arc<T>> {
    output.downcast::<T>().map_err(|_| EngineError::OutputType {
        step: name.to_string(),
        expected: type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::declaration::Step;

    fn context_with(steps: Vec<Step>) -> StepContext {
        let mut scope = Scope::new("main");
        for step in steps {
            scope.add(step).unwrap();
        }
        let registry = Arc::new(Registry::new("main"));
        for decl in scope.declarations() {
            registry.register(decl).unwrap();
        }
        let run = Arc::new(RunContext::new(Some("target".to_string()), HashMap::new(), EngineConfig::default()));
        StepContext::root(run, registry)
    }

    #[tokio::test]
    async fn test_require_forces_pending_sync_step() {
        let ctx = context_with(vec![Step::compute(|_| async { Ok("hello".to_string()) }).named("greet")]);

        assert!(ctx.peek::<String>("greet").unwrap().is_none());
        let value = ctx.require::<String>("greet").await.unwrap();
        assert_eq!(value.as_str(), "hello");
        assert_eq!(ctx.status("greet").unwrap(), StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_require_type_mismatch() {
        let ctx = context_with(vec![Step::compute(|_| async { Ok(3_u8) }).named("n")]);
        let result = ctx.require::<String>("n").await;
        assert!(matches!(result, Err(EngineError::OutputType { step, .. }) if step == "n"));
    }

    #[tokio::test]
    async fn test_require_detects_self_reference() {
        let ctx = context_with(vec![
            Step::compute(|ctx| async move { Ok(*ctx.require::<u32>("loop_a").await? + 1) })
                .named("loop_a"),
        ]);
        let result = ctx.require::<u32>("loop_a").await;
        let Err(EngineError::StepFailed { step, cause }) = result else {
            panic!("expected StepFailed, got {:?}", result);
        };
        assert_eq!(step, "loop_a");
        assert!(matches!(cause.as_ref(), EngineError::DependencyCycle { chain } if chain == &["loop_a", "loop_a"]));
    }

    #[test]
    fn test_root_context_has_no_iteration() {
        let ctx = context_with(Vec::new());
        assert_eq!(ctx.target(), Some("target"));
        assert!(ctx.iteration().is_none());
        assert!(ctx.state().is_none());
        assert!(ctx.step_name().is_none());
        assert!(matches!(ctx.scope("nope"), Err(EngineError::UnknownScope(_))));
    }

    #[test]
    fn test_iteration_context_exposes_state() {
        let ctx = context_with(Vec::new());
        let inner = ctx.for_iteration(Arc::new(Registry::for_iteration("loop", 1)), 1, Value::from(5));
        assert_eq!(inner.iteration(), Some(1));
        assert_eq!(inner.state(), Some(&Value::from(5)));
        assert_eq!(inner.registry().scope(), "loop");
        assert_eq!(inner.run_id(), ctx.run_id());
    }
}
