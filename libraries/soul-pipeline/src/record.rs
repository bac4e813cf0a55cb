//! Per-component bookkeeping
//!
//! The pipeline never reaches into a unit's private state. It keeps a shadow
//! record per attached unit with two independent slots:
//! - **primary**: ordinary lifecycle transitions (prepare/start/stop/...)
//! - **auxiliary**: one-shot completion markers (flush, seek, EOS, reset)
//!
//! so that waiting on a marker never disturbs in-flight lifecycle bookkeeping.

use crate::component::MediaComponent;
use crate::state::{ComponentRole, ComponentState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque, stable handle identifying an attached component
///
/// Events carry this handle instead of a reference to the unit, so a late
/// notification can be resolved (or dropped) without touching freed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(u32);

impl ComponentId {
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Which bookkeeping slot a command or wait observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// Lifecycle transitions
    Primary,
    /// Completion markers
    Auxiliary,
}

/// Bookkeeping shadow of one attached unit
pub(crate) struct ComponentRecord {
    id: ComponentId,
    name: String,
    unit: Arc<dyn MediaComponent>,
    role: ComponentRole,
    primary: ComponentState,
    auxiliary: ComponentState,
    /// Slot and target of the command still awaiting a completion event
    awaiting: Option<(SlotKind, ComponentState)>,
}

impl ComponentRecord {
    pub(crate) fn new(id: ComponentId, unit: Arc<dyn MediaComponent>, role: ComponentRole) -> Self {
        Self {
            id,
            name: unit.name().to_string(),
            unit,
            role,
            primary: ComponentState::Null,
            auxiliary: ComponentState::Null,
            awaiting: None,
        }
    }

    pub(crate) fn id(&self) -> ComponentId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn unit(&self) -> &Arc<dyn MediaComponent> {
        &self.unit
    }

    pub(crate) fn slot(&self, kind: SlotKind) -> ComponentState {
        match kind {
            SlotKind::Primary => self.primary,
            SlotKind::Auxiliary => self.auxiliary,
        }
    }

    pub(crate) fn set_primary(&mut self, state: ComponentState) {
        self.primary = state;
    }

    pub(crate) fn set_auxiliary(&mut self, state: ComponentState) {
        self.auxiliary = state;
    }

    fn set_slot(&mut self, kind: SlotKind, state: ComponentState) {
        match kind {
            SlotKind::Primary => self.set_primary(state),
            SlotKind::Auxiliary => self.set_auxiliary(state),
        }
    }

    /// Write the interim marker for `target` before the command is issued
    pub(crate) fn arm(&mut self, kind: SlotKind, target: ComponentState) {
        self.set_slot(kind, target.interim());
        self.awaiting = Some((kind, target));
    }

    /// Record a state the unit reached
    pub(crate) fn settle(&mut self, kind: SlotKind, state: ComponentState) {
        self.set_slot(kind, state);
        if self.awaiting == Some((kind, state)) {
            self.awaiting = None;
        }
    }

    /// Force the outstanding transition (if any) to its target
    ///
    /// Returns whether a transition was outstanding.
    pub(crate) fn converge_pending(&mut self) -> bool {
        match self.awaiting.take() {
            Some((kind, target)) => {
                self.set_slot(kind, target);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        self.awaiting.is_some()
    }

    pub(crate) fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot {
            id: self.id,
            name: self.name.clone(),
            role: self.role,
            primary: self.primary,
            auxiliary: self.auxiliary,
        }
    }
}

impl fmt::Debug for ComponentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("primary", &self.primary)
            .field("auxiliary", &self.auxiliary)
            .field("awaiting", &self.awaiting)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of one component's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    /// Component handle
    pub id: ComponentId,
    /// Component name
    pub name: String,
    /// Role declared at attach time
    pub role: ComponentRole,
    /// Last known lifecycle state
    pub primary: ComponentState,
    /// Last completion marker (or `Null`)
    pub auxiliary: ComponentState,
}
