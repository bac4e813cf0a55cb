//! Media Component Trait
//!
//! The capability every unit attached to a pipeline must expose: lifecycle
//! commands that complete synchronously or asynchronously, and an event
//! channel ([`EventSink`]) handed over at attach time.

use crate::bridge::EventSink;
use crate::error::{PipelineError, Result};
use crate::state::ComponentState;

/// Successful outcome of a component command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The operation already completed synchronously
    Done,
    /// The operation will complete later; a completion event follows on the
    /// component's event channel
    Pending,
}

impl Completion {
    /// Whether the result is still outstanding
    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }
}

/// Base trait for components driven by a [`Pipeline`](crate::Pipeline)
///
/// Commands are issued from the pipeline's control thread; events may be
/// emitted through the bound [`EventSink`] from any thread, including from
/// inside a command call.
///
/// # Implementation Requirements
/// 1. Return `Ok(Completion::Done)` only when the target state is reached
/// 2. After returning `Ok(Completion::Pending)`, emit exactly one
///    `StateReached` (or an `Error`) event for that command
/// 3. Never block a command call waiting on the pipeline itself
///
/// The pipeline never issues a new command to a unit while a previous one is
/// still pending.
pub trait MediaComponent: Send + Sync {
    /// Component name for logging
    fn name(&self) -> &str;

    /// Receive the event channel for this component (called once, at attach)
    fn bind(&self, sink: EventSink);

    /// Acquire resources; target `Prepared`
    fn prepare(&self) -> Result<Completion>;

    /// Start processing; target `Playing`
    fn start(&self) -> Result<Completion>;

    /// Pause processing; target `Paused`
    fn pause(&self) -> Result<Completion>;

    /// Resume after a pause; target `Playing`
    fn resume(&self) -> Result<Completion>;

    /// Stop processing; target `Stopped`
    fn stop(&self) -> Result<Completion>;

    /// Release resources back to the loaded state; target `Loaded`
    fn reset(&self) -> Result<Completion>;

    /// Discard buffered media; completion marker `FlushComplete`
    fn flush(&self) -> Result<Completion> {
        Err(PipelineError::Unsupported("flush"))
    }

    /// Process buffered media to end of stream; completion marker `EOSComplete`
    fn drain(&self) -> Result<Completion> {
        Err(PipelineError::Unsupported("drain"))
    }

    /// Current state as the component sees it
    fn state(&self) -> ComponentState;
}
