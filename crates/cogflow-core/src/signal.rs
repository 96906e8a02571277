//! Control-flow signals raised from step bodies.
//!
//! A step body returns `StepResult<T>`. The error side carries either a
//! [`Signal`] (skip, break, fail) or a genuine [`EngineError`]. Signals are
//! values, not panics: the scheduler inspects them to decide what happens to
//! the step record and to the surrounding walk.
//!
//! ```rust
//! use cogflow_core::{StepResult, skip};
//!
//! fn readme(contents: &str) -> StepResult<String> {
//!     if contents.is_empty() {
//!         skip!("no README");
//!     }
//!     Ok(contents.to_string())
//! }
//!
//! assert!(readme("").is_err());
//! ```

use cogflow_abstraction::CogError;
use std::fmt;

use crate::error::EngineError;

/// Control-flow signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Leave this step unavailable and continue the walk.
    Skip {
        /// Optional explanation, kept on the record.
        reason: Option<String>,
    },
    /// Stop the innermost repeat after this step.
    Break {
        /// Optional explanation, kept on the record.
        reason: Option<String>,
    },
    /// Abort the whole run.
    Fail {
        /// Message reported by the top-level handler.
        message: String,
    },
}

impl Signal {
    /// Short label used in logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skip { .. } => "skip",
            Self::Break { .. } => "break",
            Self::Fail { .. } => "fail",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip { reason: Some(r) } | Self::Break { reason: Some(r) } => {
                write!(f, "{}: {}", self.label(), r)
            }
            Self::Skip { reason: None } | Self::Break { reason: None } => f.write_str(self.label()),
            Self::Fail { message } => write!(f, "fail: {}", message),
        }
    }
}

/// Why a step body stopped without producing a value.
#[derive(Debug, Clone)]
pub enum StepInterrupt {
    /// A control-flow signal.
    Signal(Signal),
    /// An error, including failures read from other steps.
    Error(EngineError),
}

impl fmt::Display for StepInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => signal.fmt(f),
            Self::Error(err) => err.fmt(f),
        }
    }
}

impl From<Signal> for StepInterrupt {
    fn from(signal: Signal) -> Self {
        Self::Signal(signal)
    }
}

impl From<EngineError> for StepInterrupt {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::StepBroke { step } => {
                Self::Signal(Signal::Break { reason: Some(format!("step '{}' broke", step)) })
            }
            other => Self::Error(other),
        }
    }
}

impl From<CogError> for StepInterrupt {
    fn from(err: CogError) -> Self {
        Self::Error(EngineError::Cog(err))
    }
}

/// Result returned by step bodies.
pub type StepResult<T> = std::result::Result<T, StepInterrupt>;

/// A `skip` signal with a reason.
pub fn skip(reason: impl Into<String>) -> StepInterrupt {
    Signal::Skip { reason: Some(reason.into()) }.into()
}

/// A `break` signal with a reason.
pub fn break_loop(reason: impl Into<String>) -> StepInterrupt {
    Signal::Break { reason: Some(reason.into()) }.into()
}

/// A `fail` signal.
pub fn fail(message: impl Into<String>) -> StepInterrupt {
    Signal::Fail { message: message.into() }.into()
}

/// Returns a `skip` signal from the enclosing step body.
#[macro_export]
macro_rules! skip {
    () => {
        return ::std::result::Result::Err($crate::signal::StepInterrupt::Signal(
            $crate::signal::Signal::Skip { reason: ::std::option::Option::None },
        ))
    };
    ($($arg:tt)+) => {
        return ::std::result::Result::Err($crate::signal::skip(::std::format!($($arg)+)))
    };
}

/// Returns a `break` signal from the enclosing step body.
#[macro_export]
macro_rules! break_loop {
    () => {
        return ::std::result::Result::Err($crate::signal::StepInterrupt::Signal(
            $crate::signal::Signal::Break { reason: ::std::option::Option::None },
        ))
    };
    ($($arg:tt)+) => {
        return ::std::result::Result::Err($crate::signal::break_loop(::std::format!($($arg)+)))
    };
}

/// Returns a `fail` signal from the enclosing step body.
#[macro_export]
macro_rules! fail {
    ($($arg:tt)+) => {
        return ::std::result::Result::Err($crate::signal::fail(::std::format!($($arg)+)))
    };
}
