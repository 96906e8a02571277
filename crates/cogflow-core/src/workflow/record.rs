//! Step records: the per-step state cell shared by the scheduler and every
//! accessor.
//!
//! A record moves `Pending -> Running -> {Completed | Skipped | Failed}` and
//! never leaves a terminal state. The state lives in a `tokio::sync::watch`
//! channel so that any number of readers can await the terminal transition
//! while exactly one evaluator writes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use cogflow_abstraction::CogKind;

use super::declaration::{StepBody, StepDeclaration};
use crate::error::EngineError;

/// Type-erased step result.
pub type Output = Arc<dyn Any + Send + Sync>;

/// Kind of a step, used for naming and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// In-process computation.
    Compute,
    /// Shell command.
    Command,
    /// Chat completion.
    Chat,
    /// Agent invocation.
    Agent,
    /// Iterated sub-scope.
    Repeat,
}

impl StepKind {
    /// Short lowercase label, used for generated step names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Command => "cmd",
            Self::Chat => "chat",
            Self::Agent => "agent",
            Self::Repeat => "repeat",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CogKind> for StepKind {
    fn from(kind: CogKind) -> Self {
        match kind {
            CogKind::Compute => Self::Compute,
            CogKind::Command => Self::Command,
            CogKind::Chat => Self::Chat,
            CogKind::Agent => Self::Agent,
        }
    }
}

/// Whether the walk waits for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Runs to completion before the walk continues.
    Sync,
    /// Runs on its own task; the walk continues immediately.
    Async,
}

/// Status of a step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Declared, not started.
    Pending,
    /// Body is executing.
    Running,
    /// Body raised skip or break.
    Skipped,
    /// Body returned a value.
    Completed,
    /// Body raised fail or an error.
    Failed,
}

impl StepStatus {
    /// Whether the status can no longer change.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Skipped | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Skipped => "skipped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// State cell contents.
#[derive(Clone)]
pub(crate) enum Slot {
    Pending,
    Running,
    Skipped { reason: Option<String>, broke: bool },
    Completed(Output),
    Failed(Arc<EngineError>),
}

impl Slot {
    pub(crate) const fn status(&self) -> StepStatus {
        match self {
            Self::Pending => StepStatus::Pending,
            Self::Running => StepStatus::Running,
            Self::Skipped { .. } => StepStatus::Skipped,
            Self::Completed(_) => StepStatus::Completed,
            Self::Failed(_) => StepStatus::Failed,
        }
    }

    pub(crate) const fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped { reason, broke } => {
                f.debug_struct("Skipped").field("reason", reason).field("broke", broke).finish()
            }
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            other => f.write_str(&other.status().to_string()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    start_sequence: Option<u64>,
}

/// Runtime state of one declared step within one registry.
pub struct StepRecord {
    name: String,
    kind: StepKind,
    mode: ExecutionMode,
    body: StepBody,
    slot: watch::Sender<Slot>,
    sequence: Arc<AtomicU64>,
    timing: Mutex<Timing>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StepRecord {
    pub(crate) fn new(declaration: &StepDeclaration, sequence: Arc<AtomicU64>) -> Self {
        let (slot, _) = watch::channel(Slot::Pending);
        Self {
            name: declaration.name().to_string(),
            kind: declaration.kind(),
            mode: declaration.mode(),
            body: declaration.body(),
            slot,
            sequence,
            timing: Mutex::new(Timing::default()),
            handle: Mutex::new(None),
        }
    }

    /// Step name, unique within its registry.
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

    /// Current status.
    pub fn status(&self) -> StepStatus {
        self.slot.borrow().status()
    }

    /// The stored value, if the step completed.
    pub fn output(&self) -> Option<Output> {
        match &*self.slot.borrow() {
            Slot::Completed(output) => Some(Arc::clone(output)),
            _ => None,
        }
    }

    /// The recorded failure, if the step failed.
    pub fn error(&self) -> Option<Arc<EngineError>> {
        match &*self.slot.borrow() {
            Slot::Failed(err) => Some(Arc::clone(err)),
            _ => None,
        }
    }

    /// Reason given with skip or break, if any.
    pub fn skip_reason(&self) -> Option<String> {
        match &*self.slot.borrow() {
            Slot::Skipped { reason, .. } => reason.clone(),
            _ => None,
        }
    }

    /// Whether the step was skipped by a break signal.
    pub fn broke(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Skipped { broke: true, .. })
    }

    /// Position of this step in the registry's start order.
    pub fn start_sequence(&self) -> Option<u64> {
        self.timing().start_sequence
    }

    /// When the step left Pending.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.timing().started_at
    }

    /// When the step reached a terminal state.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.timing().completed_at
    }

    /// Wall-clock execution time in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        let timing = self.timing();
        match (timing.started_at, timing.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    fn timing(&self) -> Timing {
        *self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn body(&self) -> StepBody {
        Arc::clone(&self.body)
    }

    pub(crate) fn snapshot(&self) -> Slot {
        self.slot.borrow().clone()
    }

    /// Claims the record for evaluation.
    ///
    /// Returns `true` for exactly one caller: the one that moved the record
    /// out of Pending. The start sequence is stamped under the same lock.
    pub(crate) fn try_begin(&self) -> bool {
        let mut sequence = None;
        let claimed = self.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Pending) {
                *slot = Slot::Running;
                sequence = Some(self.sequence.fetch_add(1, Ordering::SeqCst));
                true
            } else {
                false
            }
        });
        if claimed {
            let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
            timing.started_at = Some(Utc::now());
            timing.start_sequence = sequence;
        }
        claimed
    }

    /// Writes the terminal state. Only the claiming evaluator calls this.
    pub(crate) fn finish(&self, outcome: Slot) {
        {
            let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
            timing.completed_at = Some(Utc::now());
        }
        let written = self.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Running) {
                *slot = outcome;
                true
            } else {
                false
            }
        });
        if !written {
            warn!(step = %self.name, status = %self.status(), "Ignoring second write to step record");
        }
    }

    /// Waits for a terminal state.
    pub(crate) async fn wait(&self) -> Slot {
        let mut rx = self.slot.subscribe();
        let terminal = rx.wait_for(Slot::is_terminal).await.map(|slot| slot.clone());
        // The sender lives in `self`, so the channel cannot close here.
        terminal.unwrap_or_else(|_| self.snapshot())
    }

    pub(crate) fn set_handle(&self, handle: JoinHandle<()>) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Whether a background task was spawned for this record.
    pub fn has_task(&self) -> bool {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl fmt::Debug for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRecord")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("slot", &*self.slot.borrow())
            .finish_non_exhaustive()
    }
}

/// Serializable view of a finished record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Step name.
    pub name: String,
    /// Step kind.
    pub kind: StepKind,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Final status.
    pub status: StepStatus,
    /// Execution time, when the step ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Skip or break reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Failure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&StepRecord> for StepSummary {
    fn from(record: &StepRecord) -> Self {
        Self {
            name: record.name().to_string(),
            kind: record.kind(),
            mode: record.mode(),
            status: record.status(),
            duration_ms: record.duration_ms(),
            reason: record.skip_reason(),
            error: record.error().map(|e| e.to_string()),
        }
    }
}
