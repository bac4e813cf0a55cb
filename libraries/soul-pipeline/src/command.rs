//! Lifecycle commands
//!
//! Every pipeline command is the same fan-out-then-barrier shape,
//! parameterized by the component operation, the target state and the slot
//! the barrier observes.

use crate::component::{Completion, MediaComponent};
use crate::error::Result;
use crate::record::SlotKind;
use crate::state::ComponentState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle command fanned out to every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Acquire resources
    Prepare,
    /// Start processing
    Start,
    /// Pause processing
    Pause,
    /// Resume after a pause
    Resume,
    /// Stop processing
    Stop,
    /// Return to the loaded state
    Reset,
    /// Discard buffered media
    Flush,
    /// Process buffered media to end of stream
    Drain,
}

impl Command {
    /// Every command
    pub const ALL: [Command; 8] = [
        Self::Prepare,
        Self::Start,
        Self::Pause,
        Self::Resume,
        Self::Stop,
        Self::Reset,
        Self::Flush,
        Self::Drain,
    ];

    /// State the components converge on
    pub fn target(self) -> ComponentState {
        match self {
            Self::Prepare => ComponentState::Prepared,
            Self::Start | Self::Resume => ComponentState::Playing,
            Self::Pause => ComponentState::Paused,
            Self::Stop => ComponentState::Stopped,
            Self::Reset => ComponentState::Loaded,
            Self::Flush => ComponentState::FlushComplete,
            Self::Drain => ComponentState::EosComplete,
        }
    }

    /// Slot the command's completion is tracked on
    pub fn slot(self) -> SlotKind {
        match self {
            Self::Flush | Self::Drain => SlotKind::Auxiliary,
            _ => SlotKind::Primary,
        }
    }

    /// Command name for logging
    pub fn name(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::Flush => "flush",
            Self::Drain => "drain",
        }
    }

    /// Issue the corresponding operation on a unit
    pub(crate) fn invoke(self, unit: &dyn MediaComponent) -> Result<Completion> {
        match self {
            Self::Prepare => unit.prepare(),
            Self::Start => unit.start(),
            Self::Pause => unit.pause(),
            Self::Resume => unit.resume(),
            Self::Stop => unit.stop(),
            Self::Reset => unit.reset(),
            Self::Flush => unit.flush(),
            Self::Drain => unit.drain(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
