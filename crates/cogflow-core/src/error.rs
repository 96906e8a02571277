//! Error types for Cogflow Core.

use cogflow_abstraction::CogError;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;

/// Core error type for engine operations.
///
/// Cloneable because the failure stored in a step record is handed to every
/// accessor that reads the step.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A forcing accessor targeted a skipped step.
    #[error("Step '{0}' is not available: it was skipped")]
    StepNotAvailable(String),

    /// An accessor targeted a failed step.
    #[error("Step '{step}' failed: {cause}")]
    StepFailed {
        /// The failed step.
        step: String,
        /// Original cause.
        cause: Arc<EngineError>,
    },

    /// Two declarations in one scope share a name.
    #[error("Duplicate step name '{name}' in scope '{scope}'")]
    DuplicateStepName {
        /// Colliding name.
        name: String,
        /// Scope holding both declarations.
        scope: String,
    },

    /// An accessor referenced a name never declared in the current registry.
    #[error("Unknown step '{name}' in scope '{scope}'")]
    UnknownStepName {
        /// Requested name.
        name: String,
        /// Scope that was searched.
        scope: String,
    },

    /// Two execution scopes share a name.
    #[error("Duplicate scope name: {0}")]
    DuplicateScopeName(String),

    /// A repeat referenced a scope that does not exist.
    #[error("Unknown execution scope: {0}")]
    UnknownScope(String),

    /// Explicit `fail` signal.
    #[error("Step '{step}' aborted the run: {message}")]
    FatalAbort {
        /// Step that raised the signal.
        step: String,
        /// Message given with the signal.
        message: String,
    },

    /// A step holds a value of a different type than the accessor asked for.
    #[error("Step '{step}' does not hold a value of type {expected}")]
    OutputType {
        /// Step that was read.
        step: String,
        /// Requested type name.
        expected: &'static str,
    },

    /// A forcing access would wait on itself.
    #[error("Dependency cycle: {}", chain.join(" -> "))]
    DependencyCycle {
        /// Evaluation chain ending with the repeated step.
        chain: Vec<String>,
    },

    /// `break` raised where no repeat can catch it.
    #[error("Step '{step}' raised break outside of a repeat scope")]
    BreakOutsideRepeat {
        /// Step that raised the signal.
        step: String,
    },

    /// A forcing accessor targeted a step that raised `break`.
    ///
    /// Converting this into a [`StepInterrupt`](crate::StepInterrupt) turns
    /// it back into a break signal, so the reader stops the repeat too.
    #[error("Step '{step}' broke the enclosing repeat")]
    StepBroke {
        /// Step that raised the signal.
        step: String,
    },

    /// A step body panicked.
    #[error("Step '{step}' panicked: {message}")]
    Panicked {
        /// Step whose body panicked.
        step: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A cog invocation failed.
    #[error("Cog error: {0}")]
    Cog(#[from] CogError),

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Broken engine invariant.
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Name of the innermost step responsible for this error, following
    /// nested `StepFailed` causes.
    pub fn root_step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, cause } => cause.root_step().or(Some(step.as_str())),
            Self::FatalAbort { step, .. }
            | Self::Panicked { step, .. }
            | Self::BreakOutsideRepeat { step }
            | Self::StepBroke { step } => Some(step),
            _ => None,
        }
    }

    /// The innermost cause, skipping `StepFailed` wrappers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StepFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub(crate) fn step_failed(step: impl Into<String>, cause: Arc<Self>) -> Self {
        Self::StepFailed { step: step.into(), cause }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_step_follows_nested_failures() {
        let inner = EngineError::FatalAbort { step: "tick".to_string(), message: "boom".to_string() };
        let mid = EngineError::step_failed("tick", Arc::new(inner));
        let outer = EngineError::step_failed("refine", Arc::new(mid));

        assert_eq!(outer.root_step(), Some("tick"));
        assert!(matches!(outer.root_cause(), EngineError::FatalAbort { message, .. } if message == "boom"));
    }

    #[test]
    fn test_root_step_of_wrapped_cog_error() {
        let err = EngineError::step_failed("fetch", Arc::new(CogError::Other("x".to_string()).into()));
        assert_eq!(err.root_step(), Some("fetch"));
        assert!(matches!(err.root_cause(), EngineError::Cog(_)));
    }

    #[test]
    fn test_step_failed_display_names_step_and_cause() {
        let err = EngineError::step_failed(
            "count_words",
            Arc::new(EngineError::StepNotAvailable("fetch_url".to_string())),
        );
        let msg = err.to_string();
        assert!(msg.contains("count_words"));
        assert!(msg.contains("fetch_url"));
    }

    #[test]
    fn test_dependency_cycle_display() {
        let err = EngineError::DependencyCycle {
            chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_cog_error_conversion() {
        let err: EngineError = CogError::InvalidInput("empty".to_string()).into();
        assert!(matches!(err, EngineError::Cog(CogError::InvalidInput(_))));
        assert_eq!(err.root_step(), None);
    }
}
