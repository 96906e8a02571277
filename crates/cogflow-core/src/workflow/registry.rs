//! Name-keyed store of step records for one scope invocation.
//!
//! The root scope gets one registry per run; every repeat iteration gets a
//! fresh one. Records keep declaration order. After an iteration finishes its
//! registry is sealed and becomes read-only history.

use indexmap::IndexMap;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::context::resolve_peek;
use super::declaration::StepDeclaration;
use super::record::{StepRecord, StepStatus, StepSummary};
use crate::error::{EngineError, Result};

/// Step records of one scope invocation.
#[derive(Debug)]
pub struct Registry {
    scope: String,
    iteration: Option<usize>,
    records: RwLock<IndexMap<String, Arc<StepRecord>>>,
    sequence: Arc<AtomicU64>,
    sealed: AtomicBool,
}

impl Registry {
    /// Registry for a top-level run of `scope`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            iteration: None,
            records: RwLock::new(IndexMap::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            sealed: AtomicBool::new(false),
        }
    }

    /// Registry for iteration `index` of a repeat over `scope`.
    pub fn for_iteration(scope: impl Into<String>, index: usize) -> Self {
        Self { iteration: Some(index), ..Self::new(scope) }
    }

    /// Scope this registry belongs to.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Iteration index, for repeat registries.
    pub fn iteration(&self) -> Option<usize> {
        self.iteration
    }

    /// Creates the Pending record for a declaration.
    pub(crate) fn register(&self, declaration: &StepDeclaration) -> Result<Arc<StepRecord>> {
        if self.is_sealed() {
            return Err(EngineError::Internal(format!(
                "registry for scope '{}' is sealed",
                self.scope
            )));
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(declaration.name()) {
            return Err(EngineError::DuplicateStepName {
                name: declaration.name().to_string(),
                scope: self.scope.clone(),
            });
        }

        let record = Arc::new(StepRecord::new(declaration, Arc::clone(&self.sequence)));
        records.insert(declaration.name().to_string(), Arc::clone(&record));
        Ok(record)
    }

    /// Looks up a record by name.
    pub fn get(&self, name: &str) -> Option<Arc<StepRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<Arc<StepRecord>> {
        self.get(name).ok_or_else(|| EngineError::UnknownStepName {
            name: name.to_string(),
            scope: self.scope.clone(),
        })
    }

    /// Whether a step of that name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.records.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Records in declaration order.
    pub fn records(&self) -> Vec<Arc<StepRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Step names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no records are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status of a step, if registered.
    pub fn status(&self, name: &str) -> Option<StepStatus> {
        self.get(name).map(|record| record.status())
    }

    /// Non-forcing typed read.
    ///
    /// `Ok(None)` while the step is pending, running or skipped;
    /// `Err(StepFailed)` once it failed.
    pub fn output<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>> {
        let record = self.lookup(name)?;
        resolve_peek(&record)
    }

    /// Summaries of every record in declaration order.
    pub fn summaries(&self) -> Vec<StepSummary> {
        self.records().iter().map(|record| StepSummary::from(record.as_ref())).collect()
    }

    /// Makes the registry read-only.
    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Whether the registry is read-only.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::declaration::{Scope, Step};

    fn declarations(names: &[&str]) -> Scope {
        let mut scope = Scope::new("main");
        for name in names {
            scope.add(Step::compute(|_| async { Ok(()) }).named(*name)).unwrap();
        }
        scope
    }

    #[test]
    fn test_register_preserves_declaration_order() {
        let scope = declarations(&["readme", "gemfile", "structure"]);
        let registry = Registry::new("main");
        for decl in scope.declarations() {
            registry.register(decl).unwrap();
        }

        assert_eq!(registry.names(), vec!["readme", "gemfile", "structure"]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.status("gemfile"), Some(StepStatus::Pending));
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let scope = declarations(&["a"]);
        let registry = Registry::new("main");
        registry.register(&scope.declarations()[0]).unwrap();

        let result = registry.register(&scope.declarations()[0]);
        assert!(matches!(result, Err(EngineError::DuplicateStepName { name, .. }) if name == "a"));
    }

    #[test]
    fn test_sealed_registry_rejects_writes() {
        let scope = declarations(&["a"]);
        let registry = Registry::for_iteration("loop", 2);
        registry.seal();

        assert!(registry.is_sealed());
        assert_eq!(registry.iteration(), Some(2));
        assert!(matches!(registry.register(&scope.declarations()[0]), Err(EngineError::Internal(_))));
    }

    #[test]
    fn test_output_of_unknown_name() {
        let registry = Registry::new("main");
        let result = registry.output::<String>("missing");
        assert!(matches!(result, Err(EngineError::UnknownStepName { name, scope }) if name == "missing" && scope == "main"));
    }

    #[test]
    fn test_output_of_pending_step_is_absent() {
        let scope = declarations(&["a"]);
        let registry = Registry::new("main");
        registry.register(&scope.declarations()[0]).unwrap();

        assert!(registry.output::<()>("a").unwrap().is_none());
    }

    #[test]
    fn test_shared_start_sequence() {
        let scope = declarations(&["a", "b"]);
        let registry = Registry::new("main");
        let a = registry.register(&scope.declarations()[0]).unwrap();
        let b = registry.register(&scope.declarations()[1]).unwrap();

        assert!(b.try_begin());
        assert!(a.try_begin());
        assert_eq!(b.start_sequence(), Some(0));
        assert_eq!(a.start_sequence(), Some(1));
    }
}
