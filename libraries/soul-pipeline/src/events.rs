//! Pipeline Events
//!
//! Outbound notifications delivered to the pipeline's owner:
//! - exactly one `CommandComplete` per command that returned `Pending`
//! - `ComponentError` whenever a component fails asynchronously
//! - `Info` for component-specific notifications passed through unchanged

use crate::bridge::Payload;
use crate::command::Command;
use crate::error::PipelineError;
use crate::record::ComponentId;
use crate::state::ComponentState;
use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;

/// Event id of [`PipelineMessage::CommandComplete`]
pub const EVENT_COMMAND_COMPLETE: i32 = 1;
/// Event id of [`PipelineMessage::ComponentError`]
pub const EVENT_COMPONENT_ERROR: i32 = 2;
/// Event id of [`PipelineMessage::Info`]
pub const EVENT_INFO: i32 = 3;

/// Notification sent to the pipeline's owner
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// Terminal result of a command
    CommandComplete {
        /// The command that finished
        command: Command,
        /// Its outcome
        result: Result<(), PipelineError>,
        /// Aggregate state after the command
        state: ComponentState,
    },

    /// A component failed asynchronously
    ComponentError {
        /// The failing component
        component: ComponentId,
        /// Reported error
        error: PipelineError,
    },

    /// Component-specific notification
    Info {
        /// Originating component
        component: ComponentId,
        /// Component-defined event code
        code: i32,
        /// First parameter
        param1: i32,
        /// Second parameter
        param2: i32,
        /// Optional opaque payload
        payload: Option<Payload>,
    },
}

impl PipelineMessage {
    /// Numeric event id
    pub fn event_id(&self) -> i32 {
        match self {
            Self::CommandComplete { .. } => EVENT_COMMAND_COMPLETE,
            Self::ComponentError { .. } => EVENT_COMPONENT_ERROR,
            Self::Info { .. } => EVENT_INFO,
        }
    }

    /// Whether this message ends a command
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CommandComplete { .. })
    }

    /// `(param1, param2)` in the numeric message convention
    ///
    /// For `CommandComplete`: the status code (0 on success) and the
    /// aggregate state discriminant.
    pub fn params(&self) -> (i32, i32) {
        match self {
            Self::CommandComplete { result, state, .. } => {
                let status = result.as_ref().map_or_else(PipelineError::code, |_| 0);
                (status, *state as i32)
            }
            Self::ComponentError { component, error } => (error.code(), component.as_u32() as i32),
            Self::Info { param1, param2, .. } => (*param1, *param2),
        }
    }
}

/// Receiver of pipeline notifications
///
/// Called from the pipeline's control thread (command results) and from
/// component threads (forwarded events). Must not block for long.
pub trait PipelineListener: Send + Sync {
    /// Handle one message
    fn on_message(&self, message: PipelineMessage);
}

impl<F> PipelineListener for F
where
    F: Fn(PipelineMessage) + Send + Sync,
{
    fn on_message(&self, message: PipelineMessage) {
        self(message);
    }
}

/// Listener that forwards every message into a channel
pub fn channel_listener() -> (Arc<dyn PipelineListener>, Receiver<PipelineMessage>) {
    let (tx, rx) = unbounded();
    let listener: Arc<dyn PipelineListener> = Arc::new(move |message: PipelineMessage| {
        // Receiver gone means nobody is listening any more
        tx.send(message).ok();
    });
    (listener, rx)
}
