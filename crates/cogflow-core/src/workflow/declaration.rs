//! Step declarations and execution scopes.
//!
//! A [`Step`] is built fluently and added to a [`Scope`], which fixes its
//! name and turns it into an immutable [`StepDeclaration`]. Scopes are pure
//! data: nothing runs until the scheduler walks them.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use cogflow_abstraction::Cog;

use super::context::StepContext;
use super::record::{ExecutionMode, Output, StepKind};
use super::repeat::{RepeatConfig, RepeatController};
use crate::error::{EngineError, Result};
use crate::signal::StepResult;

/// Future returned by a step body.
pub type StepFuture = BoxFuture<'static, StepResult<Output>>;

/// Type-erased step body.
pub type StepBody = Arc<dyn Fn(StepContext) -> StepFuture + Send + Sync>;

/// Future returned by a scope's outputs hook.
pub type OutputsFuture = BoxFuture<'static, StepResult<IterationOutputs>>;

/// Per-iteration hook deriving the next state and the collected output.
pub type OutputsBody = Arc<dyn Fn(StepContext) -> OutputsFuture + Send + Sync>;

/// What an iteration hands back to its repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationOutputs {
    /// State for the next iteration.
    pub state: Value,
    /// Value collected for this iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl IterationOutputs {
    /// Next state plus a collected value.
    pub fn new(state: Value, output: Value) -> Self {
        Self { state, output: Some(output) }
    }

    /// Next state without collecting anything.
    pub fn state_only(state: Value) -> Self {
        Self { state, output: None }
    }
}

/// Builder for a step.
#[derive(Clone)]
pub struct Step {
    name: Option<String>,
    kind: StepKind,
    mode: ExecutionMode,
    body: StepBody,
    repeat_scope: Option<String>,
}

impl Step {
    fn from_body(kind: StepKind, body: StepBody) -> Self {
        Self { name: None, kind, mode: ExecutionMode::Sync, body, repeat_scope: None }
    }

    /// A step running an in-process computation.
    pub fn compute<T, F, Fut>(body: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<T>> + Send + 'static,
    {
        let body: StepBody = Arc::new(move |ctx: StepContext| -> StepFuture {
            let fut = body(ctx);
            Box::pin(async move { fut.await.map(|value| Arc::new(value) as Output) })
        });
        Self::from_body(StepKind::Compute, body)
    }

    /// A step invoking `cog` with the input built by `input`.
    ///
    /// The input builder runs inside the step, so it may read other steps
    /// and raise signals before the cog is touched.
    pub fn cog<C, F, Fut>(cog: Arc<C>, input: F) -> Self
    where
        C: Cog + 'static,
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<C::Input>> + Send + 'static,
    {
        Self::cog_with(cog, input, Ok)
    }

    /// Like [`Step::cog`], passing the cog's output through `finish`, which
    /// may convert it or raise a signal.
    pub fn cog_with<C, F, Fut, M, T>(cog: Arc<C>, input: F, finish: M) -> Self
    where
        C: Cog + 'static,
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<C::Input>> + Send + 'static,
        M: Fn(C::Output) -> StepResult<T> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        let kind = StepKind::from(cog.kind());
        let finish = Arc::new(finish);
        let body: StepBody = Arc::new(move |ctx: StepContext| -> StepFuture {
            let cog = Arc::clone(&cog);
            let finish = Arc::clone(&finish);
            let input = input(ctx);
            Box::pin(async move {
                let output = cog.invoke(input.await?).await?;
                finish(output).map(|value| Arc::new(value) as Output)
            })
        });
        Self::from_body(kind, body)
    }

    /// A step iterating the named scope.
    ///
    /// `initial_state` is evaluated once, before the first iteration. The
    /// step's value is a [`RepeatOutput`](super::repeat::RepeatOutput).
    pub fn repeat<F, Fut>(scope: impl Into<String>, initial_state: F, config: RepeatConfig) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<Value>> + Send + 'static,
    {
        let scope = scope.into();
        let target = scope.clone();
        let body: StepBody = Arc::new(move |ctx: StepContext| -> StepFuture {
            let scope = target.clone();
            let config = config.clone();
            let initial = initial_state(ctx.clone());
            Box::pin(async move {
                let output = RepeatController::new(config).run(&ctx, &scope, initial).await?;
                Ok(Arc::new(output) as Output)
            })
        });
        Self { repeat_scope: Some(scope), ..Self::from_body(StepKind::Repeat, body) }
    }

    /// Sets the step name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Runs the step on its own task instead of blocking the walk.
    #[must_use]
    pub fn background(mut self) -> Self {
        self.mode = ExecutionMode::Async;
        self
    }

    /// Explicit name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Step kind.
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("repeat_scope", &self.repeat_scope)
            .finish_non_exhaustive()
    }
}

/// A named step within a scope.
#[derive(Clone)]
pub struct StepDeclaration {
    name: String,
    kind: StepKind,
    mode: ExecutionMode,
    body: StepBody,
    repeat_scope: Option<String>,
}

impl StepDeclaration {
    /// Step name, unique within the scope.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step kind.
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Scope iterated by a repeat step.
    pub fn repeat_scope(&self) -> Option<&str> {
        self.repeat_scope.as_deref()
    }

    pub(crate) fn body(&self) -> StepBody {
        Arc::clone(&self.body)
    }
}

impl fmt::Debug for StepDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDeclaration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("repeat_scope", &self.repeat_scope)
            .finish_non_exhaustive()
    }
}

/// Ordered step declarations evaluated together.
#[derive(Clone)]
pub struct Scope {
    name: String,
    declarations: Vec<StepDeclaration>,
    outputs: Option<OutputsBody>,
    counters: HashMap<StepKind, usize>,
}

impl Scope {
    /// An empty scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), declarations: Vec::new(), outputs: None, counters: HashMap::new() }
    }

    /// Scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a step, naming it `<kind>_<n>` when it has no name.
    pub fn add(&mut self, step: Step) -> Result<&mut Self> {
        let name = match step.name {
            Some(name) => name,
            None => self.generate_name(step.kind),
        };
        if self.declarations.iter().any(|d| d.name == name) {
            return Err(EngineError::DuplicateStepName { name, scope: self.name.clone() });
        }

        self.declarations.push(StepDeclaration {
            name,
            kind: step.kind,
            mode: step.mode,
            body: step.body,
            repeat_scope: step.repeat_scope,
        });
        Ok(self)
    }

    fn generate_name(&mut self, kind: StepKind) -> String {
        let counter = self.counters.entry(kind).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", kind.as_str(), counter);
            if !self.declarations.iter().any(|d| d.name == candidate) {
                return candidate;
            }
        }
    }

    /// Installs the hook run after each iteration when this scope is
    /// repeated.
    pub fn outputs<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<IterationOutputs>> + Send + 'static,
    {
        self.outputs = Some(Arc::new(move |ctx: StepContext| -> OutputsFuture { Box::pin(hook(ctx)) }));
        self
    }

    /// Declarations in order.
    pub fn declarations(&self) -> &[StepDeclaration] {
        &self.declarations
    }

    /// Number of declarations.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Whether the scope declares nothing.
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Whether an outputs hook is installed.
    pub fn has_outputs(&self) -> bool {
        self.outputs.is_some()
    }

    pub(crate) fn outputs_hook(&self) -> Option<OutputsBody> {
        self.outputs.clone()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("declarations", &self.declarations)
            .field("has_outputs", &self.outputs.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnamed_steps_get_kind_counters() {
        let mut scope = Scope::new("main");
        scope.add(Step::compute(|_| async { Ok(1) })).unwrap();
        scope.add(Step::compute(|_| async { Ok(2) }).background()).unwrap();
        scope.add(Step::repeat("loop", |_| async { Ok(Value::Null) }, RepeatConfig::default())).unwrap();

        let names: Vec<_> = scope.declarations().iter().map(StepDeclaration::name).collect();
        assert_eq!(names, vec!["compute_1", "compute_2", "repeat_1"]);
        assert_eq!(scope.declarations()[1].mode(), ExecutionMode::Async);
        assert_eq!(scope.declarations()[2].repeat_scope(), Some("loop"));
    }

    #[test]
    fn test_generated_name_avoids_explicit_names() {
        let mut scope = Scope::new("main");
        scope.add(Step::compute(|_| async { Ok(()) }).named("compute_1")).unwrap();
        scope.add(Step::compute(|_| async { Ok(()) })).unwrap();

        assert_eq!(scope.declarations()[1].name(), "compute_2");
    }

    #[test]
    fn test_duplicate_name_rejected_at_declaration() {
        let mut scope = Scope::new("main");
        scope.add(Step::compute(|_| async { Ok(()) }).named("readme")).unwrap();

        let result = scope.add(Step::compute(|_| async { Ok(()) }).named("readme"));
        assert!(matches!(
            result,
            Err(EngineError::DuplicateStepName { name, scope }) if name == "readme" && scope == "main"
        ));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn test_iteration_outputs_constructors() {
        let full = IterationOutputs::new(Value::from(1), Value::from("x"));
        assert_eq!(full.output, Some(Value::from("x")));
        assert!(IterationOutputs::state_only(Value::from(2)).output.is_none());
    }
}
