//! Pipeline core - shared bookkeeping and the fan-out algorithm
//!
//! One mutex plus one condition variable guard every piece of
//! pipeline-owned state: the component records, the aggregate state, the
//! buffered asynchronous error and the cancel flag. Component calls are
//! always made with the lock released.

use crate::barrier::{Barrier, Convergence};
use crate::bridge::{ComponentEvent, EventBridge, EventSink, EventTarget};
use crate::command::Command;
use crate::component::{Completion, MediaComponent};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{PipelineListener, PipelineMessage};
use crate::record::{ComponentId, ComponentRecord, ComponentSnapshot, SlotKind};
use crate::state::{ComponentRole, ComponentState};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// State guarded by the pipeline lock
#[derive(Debug, Default)]
pub(crate) struct CoreState {
    /// Attach order, never reordered
    records: Vec<ComponentRecord>,
    /// Handle -> index into `records`
    registry: HashMap<ComponentId, usize>,
    aggregate: ComponentState,
    last_async_error: Option<PipelineError>,
    cancel_requested: bool,
    /// Barrier parked per slot kind (primary, auxiliary)
    barriers: [bool; 2],
    /// Commands accepted by the façade and not yet reported
    in_flight: usize,
    /// Set once teardown starts; makes cancellation permanent
    closed: bool,
    next_id: u32,
}

fn slot_index(slot: SlotKind) -> usize {
    match slot {
        SlotKind::Primary => 0,
        SlotKind::Auxiliary => 1,
    }
}

impl CoreState {
    fn record_mut(&mut self, id: ComponentId) -> Option<&mut ComponentRecord> {
        let index = *self.registry.get(&id)?;
        self.records.get_mut(index)
    }
}

impl Convergence for CoreState {
    fn aggregate(&self) -> ComponentState {
        self.aggregate
    }

    fn set_aggregate(&mut self, state: ComponentState) {
        self.aggregate = state;
    }

    fn converged(&self, slot: SlotKind, target: ComponentState) -> bool {
        self.records.iter().all(|record| record.slot(slot) == target)
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    fn take_async_error(&mut self) -> Option<PipelineError> {
        self.last_async_error.take()
    }

    fn barrier_active(&self, slot: SlotKind) -> bool {
        self.barriers[slot_index(slot)]
    }

    fn set_barrier_active(&mut self, slot: SlotKind, active: bool) {
        self.barriers[slot_index(slot)] = active;
    }
}

/// Shared pipeline bookkeeping
pub(crate) struct PipelineCore {
    state: Mutex<CoreState>,
    condvar: Condvar,
    listener: Mutex<Option<Arc<dyn PipelineListener>>>,
    config: PipelineConfig,
}

impl PipelineCore {
    pub(crate) fn new(config: PipelineConfig) -> Self {
        Self {
            state: Mutex::new(CoreState::default()),
            condvar: Condvar::new(),
            listener: Mutex::new(None),
            config,
        }
    }

    pub(crate) fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub(crate) fn set_listener(&self, listener: Option<Arc<dyn PipelineListener>>) {
        *self.listener.lock() = listener;
    }

    /// Hand a message to the owner's listener, if any
    pub(crate) fn notify(&self, message: PipelineMessage) {
        let listener = self.listener.lock().clone();
        match listener {
            Some(listener) => listener.on_message(message),
            None => trace!("No listener for {:?}", message),
        }
    }

    fn barrier(&self) -> Barrier<'_, CoreState> {
        Barrier::new(&self.state, &self.condvar, self.config.scheduling_tolerance())
    }

    // ===== Attach / queries =====

    /// Register a unit and bind its event sink
    pub(crate) fn attach(
        &self,
        unit: Arc<dyn MediaComponent>,
        role: ComponentRole,
        bridge: &Arc<EventBridge>,
    ) -> Result<ComponentId> {
        let id = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PipelineError::ShutDown);
            }
            if state.in_flight > 0 || state.barriers.iter().any(|active| *active) {
                return Err(PipelineError::Busy);
            }

            let id = ComponentId::from_raw(state.next_id);
            state.next_id += 1;

            let record = ComponentRecord::new(id, unit.clone(), role);
            info!("Attached {} '{}' as {}", id, record.name(), role);
            let index = state.records.len();
            state.records.push(record);
            state.registry.insert(id, index);

            if state.aggregate != ComponentState::Null {
                debug!(
                    "Aggregate demoted from {} to Null by newly attached {}",
                    state.aggregate, id
                );
                state.aggregate = ComponentState::Null;
            }
            id
        };

        unit.bind(EventSink::new(id, bridge.clone()));
        Ok(id)
    }

    pub(crate) fn aggregate(&self) -> ComponentState {
        self.state.lock().aggregate
    }

    pub(crate) fn snapshot(&self) -> Vec<ComponentSnapshot> {
        self.state.lock().records.iter().map(ComponentRecord::snapshot).collect()
    }

    pub(crate) fn component(&self, id: ComponentId) -> Result<ComponentSnapshot> {
        let state = self.state.lock();
        state
            .registry
            .get(&id)
            .and_then(|index| state.records.get(*index))
            .map(ComponentRecord::snapshot)
            .ok_or(PipelineError::UnknownComponent(id))
    }

    fn units(&self) -> Vec<(ComponentId, Arc<dyn MediaComponent>)> {
        self.state
            .lock()
            .records
            .iter()
            .map(|record| (record.id(), record.unit().clone()))
            .collect()
    }

    /// Re-probe every unit's own state
    ///
    /// When no command is outstanding the primary slots are refreshed, and if
    /// every unit agrees the aggregate snaps to that state.
    pub(crate) fn probe(&self) -> ComponentState {
        let probed: Vec<(ComponentId, ComponentState)> = self
            .units()
            .into_iter()
            .map(|(id, unit)| (id, unit.state()))
            .collect();

        let mut state = self.state.lock();
        if state.in_flight > 0 || state.barrier_active(SlotKind::Primary) {
            return state.aggregate;
        }

        for (id, observed) in &probed {
            if observed.is_completion_marker() {
                continue;
            }
            if let Some(record) = state.record_mut(*id) {
                if record.is_awaiting() {
                    trace!(
                        "{} '{}' reports {} after an abandoned wait",
                        id,
                        record.name(),
                        observed
                    );
                }
                record.settle(SlotKind::Primary, *observed);
            }
        }

        if let Some((_, first)) = probed.first() {
            if !first.is_completion_marker() && probed.iter().all(|(_, s)| s == first) {
                if state.aggregate != *first {
                    debug!("Probe snapped aggregate from {} to {}", state.aggregate, first);
                }
                state.aggregate = *first;
            }
        }
        state.aggregate
    }

    // ===== Command accounting (façade) =====

    /// Account for a command about to be queued
    ///
    /// Returns `false` when the pipeline is idle and already at the target,
    /// in which case nothing is queued.
    pub(crate) fn begin(&self, command: Command) -> Result<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PipelineError::ShutDown);
        }
        if state.in_flight == 0
            && command.slot() == SlotKind::Primary
            && state.aggregate == command.target()
        {
            return Ok(false);
        }
        state.in_flight += 1;
        Ok(true)
    }

    /// Account for a command that was reported (or never queued)
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    // ===== Cancellation / teardown =====

    /// Set the sticky cancel flag and wake every parked wait
    pub(crate) fn cancel(&self) {
        self.state.lock().cancel_requested = true;
        self.condvar.notify_all();
    }

    /// Make cancellation permanent; later commands fail with `ShutDown`
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.cancel_requested = true;
        }
        self.condvar.notify_all();
    }

    // ===== Markers =====

    /// Reset every auxiliary slot to `Null`
    pub(crate) fn clear_markers(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.barrier_active(SlotKind::Auxiliary) {
            return Err(PipelineError::Busy);
        }
        for record in &mut state.records {
            record.set_auxiliary(ComponentState::Null);
        }
        Ok(())
    }

    /// Wait until every component reported `marker`
    ///
    /// Runs as an observer: a flush or drain queued meanwhile still claims
    /// the auxiliary slot, and the buffered error stays with the command.
    pub(crate) fn await_marker(&self, marker: ComponentState, timeout: Duration) -> Result<()> {
        if !marker.is_completion_marker() {
            return Err(PipelineError::InvalidTarget(marker));
        }
        self.barrier().observe(SlotKind::Auxiliary, marker, timeout)
    }

    // ===== Fan-out =====

    /// Fan `command` out to every component in attach order, then wait for
    /// convergence
    pub(crate) fn run_lifecycle_command(&self, command: Command, timeout: Duration) -> Result<()> {
        let target = command.target();
        let slot = command.slot();

        let units = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PipelineError::ShutDown);
            }
            state.cancel_requested = false;
            state.last_async_error = None;

            if slot == SlotKind::Primary && state.aggregate == target {
                debug!("Pipeline already {}, {} is a no-op", target, command);
                return Ok(());
            }

            state
                .records
                .iter()
                .map(|record| (record.id(), record.unit().clone()))
                .collect::<Vec<_>>()
        };

        debug!("Running {} towards {} over {} components", command, target, units.len());

        let mut pending = false;
        for (id, unit) in units {
            {
                let mut state = self.state.lock();
                let Some(record) = state.record_mut(id) else {
                    continue;
                };
                if slot == SlotKind::Primary && record.slot(slot) == target {
                    trace!("{} '{}' already {}, skipped", id, record.name(), target);
                    continue;
                }
                record.arm(slot, target);
            }

            debug!("Issuing {} to {} '{}'", command, id, unit.name());
            let result = command.invoke(unit.as_ref());

            let mut state = self.state.lock();
            match result {
                Ok(Completion::Done) => {
                    if let Some(record) = state.record_mut(id) {
                        record.settle(slot, target);
                    }
                }
                Ok(Completion::Pending) => {
                    pending = true;
                }
                Err(error) => {
                    warn!("{} '{}' failed {}: {}", id, unit.name(), command, error);
                    if let Some(record) = state.record_mut(id) {
                        record.settle(slot, target);
                    }
                    if slot == SlotKind::Primary {
                        state.aggregate = target;
                    }
                    return Err(error);
                }
            }
            // Wake a marker waiter that may be watching this slot
            self.condvar.notify_all();
        }

        if pending {
            return self.barrier().wait(slot, target, timeout);
        }

        if slot == SlotKind::Primary {
            self.state.lock().aggregate = target;
        }
        Ok(())
    }
}

impl EventTarget for PipelineCore {
    fn ingest(&self, sender: ComponentId, event: ComponentEvent) -> Option<PipelineMessage> {
        let forward = {
            let mut state = self.state.lock();
            let Some(record) = state.record_mut(sender) else {
                debug!("Dropping {:?} from unknown {}", event, sender);
                return None;
            };

            match event {
                ComponentEvent::StateReached(ComponentState::Invalid) => {
                    warn!("{} '{}' became Invalid", sender, record.name());
                    let error =
                        PipelineError::failed(format!("{} entered Invalid state", record.name()));
                    if !record.converge_pending() {
                        record.set_primary(ComponentState::Invalid);
                    }
                    state.last_async_error = Some(error.clone());
                    Some(PipelineMessage::ComponentError {
                        component: sender,
                        error,
                    })
                }
                ComponentEvent::StateReached(reached) => {
                    trace!("{} '{}' reached {}", sender, record.name(), reached);
                    let slot = if reached.is_completion_marker() {
                        SlotKind::Auxiliary
                    } else {
                        SlotKind::Primary
                    };
                    record.settle(slot, reached);
                    None
                }
                ComponentEvent::Error(error) => {
                    warn!("{} '{}' reported error: {}", sender, record.name(), error);
                    record.converge_pending();
                    state.last_async_error = Some(error.clone());
                    Some(PipelineMessage::ComponentError {
                        component: sender,
                        error,
                    })
                }
                ComponentEvent::Info {
                    code,
                    param1,
                    param2,
                    payload,
                } => Some(PipelineMessage::Info {
                    component: sender,
                    code,
                    param1,
                    param2,
                    payload,
                }),
            }
        };

        self.condvar.notify_all();
        forward
    }

    fn forward(&self, message: PipelineMessage) {
        self.notify(message);
    }
}
