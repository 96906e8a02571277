//! Workflow definition and the top-level run handler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::context::{RunContext, StepContext};
use super::declaration::{Scope, Step};
use super::record::{StepStatus, StepSummary};
use super::registry::Registry;
use super::scheduler::Scheduler;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// A main scope plus the named scopes its repeats iterate.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    main: Scope,
    scopes: HashMap<String, Arc<Scope>>,
    config: EngineConfig,
}

impl Workflow {
    /// An empty workflow. The main scope carries the workflow's name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { main: Scope::new(name.clone()), name, scopes: HashMap::new(), config: EngineConfig::default() }
    }

    /// Replaces the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The main scope.
    pub fn main(&self) -> &Scope {
        &self.main
    }

    /// Appends a step to the main scope.
    pub fn step(&mut self, step: Step) -> Result<&mut Self> {
        self.main.add(step)?;
        Ok(self)
    }

    /// Registers a named execution scope for repeats.
    pub fn add_scope(&mut self, scope: Scope) -> Result<&mut Self> {
        if scope.name() == self.main.name() || self.scopes.contains_key(scope.name()) {
            return Err(EngineError::DuplicateScopeName(scope.name().to_string()));
        }
        self.scopes.insert(scope.name().to_string(), Arc::new(scope));
        Ok(self)
    }

    /// A named execution scope.
    pub fn scope(&self, name: &str) -> Option<&Scope> {
        self.scopes.get(name).map(|scope| scope.as_ref())
    }

    /// Names of the execution scopes, sorted.
    pub fn scope_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scopes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Checks that every repeat names a known scope and that the
    /// configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        let all = std::iter::once(&self.main).chain(self.scopes.values().map(|scope| scope.as_ref()));
        for scope in all {
            for declaration in scope.declarations() {
                if let Some(target) = declaration.repeat_scope()
                    && !self.scopes.contains_key(target)
                {
                    return Err(EngineError::UnknownScope(target.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Runs the main scope.
    ///
    /// This is the top-level handler: a failure anywhere in the run is
    /// logged here with the name of the step that caused it and returned.
    pub async fn run(&self, target: Option<String>) -> Result<RunReport> {
        self.validate()?;

        let run = Arc::new(RunContext::new(target.clone(), self.scopes.clone(), self.config.clone()));
        let run_id = run.run_id;
        let registry = Arc::new(Registry::new(self.main.name()));
        let ctx = StepContext::root(run, Arc::clone(&registry));
        let started_at = Utc::now();

        info!(run_id = %run_id, workflow = %self.name, target = ?target, "Starting workflow run");

        match Scheduler::run(&self.main, &ctx).await {
            Ok(_) => {
                registry.seal();
                let report = RunReport {
                    run_id,
                    workflow: self.name.clone(),
                    target,
                    started_at,
                    completed_at: Utc::now(),
                    registry,
                };
                info!(
                    run_id = %run_id,
                    workflow = %self.name,
                    steps = report.registry.len(),
                    duration_ms = report.duration_ms(),
                    "Workflow run completed"
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    run_id = %run_id,
                    workflow = %self.name,
                    step = err.root_step().unwrap_or("-"),
                    error = %err,
                    "Workflow run failed"
                );
                Err(err)
            }
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    run_id: Uuid,
    workflow: String,
    target: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    registry: Arc<Registry>,
}

impl RunReport {
    /// Run identifier.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Workflow name.
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Target the run was given.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End time.
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Run duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.completed_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Sealed root registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Final status of a step.
    pub fn status(&self, name: &str) -> Option<StepStatus> {
        self.registry.status(name)
    }

    /// Typed value of a step, `None` if it did not complete.
    pub fn output<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>> {
        self.registry.output(name)
    }

    /// Per-step summaries in declaration order.
    pub fn summaries(&self) -> Vec<StepSummary> {
        self.registry.summaries()
    }

    /// Serializable form of the report.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            workflow: self.workflow.clone(),
            target: self.target.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms(),
            steps: self.summaries(),
        }
    }
}

/// Serializable run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: Uuid,
    /// Workflow name.
    pub workflow: String,
    /// Run target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub completed_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Root steps in declaration order.
    pub steps: Vec<StepSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::repeat::RepeatConfig;
    use serde_json::Value;

    #[test]
    fn test_duplicate_scope_name() {
        let mut workflow = Workflow::new("main");
        workflow.add_scope(Scope::new("loop")).unwrap();

        assert!(matches!(workflow.add_scope(Scope::new("loop")), Err(EngineError::DuplicateScopeName(n)) if n == "loop"));
        assert!(matches!(workflow.add_scope(Scope::new("main")), Err(EngineError::DuplicateScopeName(_))));
        assert_eq!(workflow.scope_names(), vec!["loop"]);
    }

    #[test]
    fn test_validate_rejects_unknown_scope() {
        let mut workflow = Workflow::new("main");
        workflow
            .step(Step::repeat("missing", |_| async { Ok(Value::Null) }, RepeatConfig::default()))
            .unwrap();

        assert!(matches!(workflow.validate(), Err(EngineError::UnknownScope(n)) if n == "missing"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let workflow = Workflow::new("main")
            .with_config(EngineConfig { max_concurrent_async: Some(0), ..EngineConfig::default() });
        assert!(matches!(workflow.validate(), Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_report_contents() {
        let mut workflow = Workflow::new("demo");
        workflow
            .step(Step::compute(|ctx| async move { Ok(ctx.target().unwrap_or("none").len()) }).named("len"))
            .unwrap();

        let report = workflow.run(Some("abcd".to_string())).await.unwrap();

        assert_eq!(report.workflow(), "demo");
        assert_eq!(report.target(), Some("abcd"));
        assert_eq!(report.status("len"), Some(StepStatus::Completed));
        assert_eq!(*report.output::<usize>("len").unwrap().unwrap(), 4);
        assert!(report.registry().is_sealed());

        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["steps"][0]["name"], "len");
        assert_eq!(json["steps"][0]["status"], "completed");
    }
}
