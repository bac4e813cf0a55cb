//! Component lifecycle states
//!
//! `ComponentState` is shared by every attached component and by the
//! pipeline aggregate. Lifecycle values are ordered by progress; the four
//! trailing values are completion markers tracked on the auxiliary slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a component (or of the whole pipeline)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// Nothing loaded yet - the only legal initial value
    #[default]
    Null,
    /// Loading (interim value for `Loaded`)
    Loading,
    /// Loaded and configured, resources not yet acquired
    Loaded,
    /// Preparing (interim value for `Prepared`)
    Preparing,
    /// Prepared and ready to start
    Prepared,
    /// Pausing (interim value for `Paused`)
    Pausing,
    /// Paused
    Paused,
    /// Starting playback (interim value for `Playing`)
    Play,
    /// Playing
    Playing,
    /// Stopping (interim value for `Stopped`)
    Stop,
    /// Stopped
    Stopped,
    /// Unrecoverable - never a transition target
    Invalid,
    /// Seek finished
    SeekComplete,
    /// Reset finished
    ResetComplete,
    /// Flush finished
    FlushComplete,
    /// End of stream reached after a drain
    EosComplete,
}

/// Debug names, indexed by discriminant
const STATE_NAMES: [&str; 16] = [
    "Null",
    "Loading",
    "Loaded",
    "Preparing",
    "Prepared",
    "Pausing",
    "Paused",
    "Play",
    "Playing",
    "Stop",
    "Stopped",
    "Invalid",
    "SeekComplete",
    "ResetComplete",
    "FlushComplete",
    "EOSComplete",
];

impl ComponentState {
    /// Every state, in declaration order
    pub const ALL: [ComponentState; 16] = [
        Self::Null,
        Self::Loading,
        Self::Loaded,
        Self::Preparing,
        Self::Prepared,
        Self::Pausing,
        Self::Paused,
        Self::Play,
        Self::Playing,
        Self::Stop,
        Self::Stopped,
        Self::Invalid,
        Self::SeekComplete,
        Self::ResetComplete,
        Self::FlushComplete,
        Self::EosComplete,
    ];

    /// Human-readable state name
    pub fn name(self) -> &'static str {
        STATE_NAMES[self as usize]
    }

    /// Look a state up by its debug name
    pub fn from_name(name: &str) -> Option<Self> {
        STATE_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| Self::ALL[index])
    }

    /// Whether this is one of the auxiliary completion markers
    pub fn is_completion_marker(self) -> bool {
        matches!(
            self,
            Self::SeekComplete | Self::ResetComplete | Self::FlushComplete | Self::EosComplete
        )
    }

    /// Whether this is an "in transition" value
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Preparing | Self::Pausing | Self::Play | Self::Stop
        )
    }

    /// Whether a command may drive components to this state
    pub fn is_valid_target(self) -> bool {
        self != Self::Invalid && self != Self::Null && !self.is_transitional()
    }

    /// Interim marker written to a slot before a command towards `self` is issued
    ///
    /// Completion markers are cleared to `Null` while armed.
    pub fn interim(self) -> ComponentState {
        match self {
            Self::Loaded => Self::Loading,
            Self::Prepared => Self::Preparing,
            Self::Paused => Self::Pausing,
            Self::Playing => Self::Play,
            Self::Stopped => Self::Stop,
            _ => Self::Null,
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role a component plays in the pipeline, fixed at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentRole {
    /// Produces media (file reader, network receiver, capture device)
    Source,
    /// Transforms media (decoder, resampler, effect)
    Filter,
    /// Consumes media (audio renderer, encoder output)
    Sink,
}

impl ComponentRole {
    /// Human-readable role name
    pub fn name(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Filter => "filter",
            Self::Sink => "sink",
        }
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
