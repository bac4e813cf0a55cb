//! Barrier - bounded, cancellable wait for component convergence
//!
//! Blocks the calling thread until every component's slot of the requested
//! kind holds the target state, the wait is cancelled, or the deadline passes.
//! The pipeline lock is released while parked on the condition variable.
//!
//! A command wait owns its slot: an error reported asynchronously during the
//! wait downgrades an otherwise successful outcome, and the buffered error is
//! cleared on every exit. Observer waits share the slot and never consume
//! the error.

use crate::error::{PipelineError, Result};
use crate::record::SlotKind;
use crate::state::ComponentState;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Bookkeeping a barrier evaluates under the pipeline lock
pub(crate) trait Convergence {
    /// Current aggregate state
    fn aggregate(&self) -> ComponentState;

    /// Overwrite the aggregate state
    fn set_aggregate(&mut self, state: ComponentState);

    /// Whether every component's `slot` equals `target` (true when empty)
    fn converged(&self, slot: SlotKind, target: ComponentState) -> bool;

    /// Whether the sticky cancel flag is set
    fn cancel_requested(&self) -> bool;

    /// Take (and clear) the error buffered since the command started
    fn take_async_error(&mut self) -> Option<PipelineError>;

    /// Whether a barrier over `slot` is currently parked
    fn barrier_active(&self, slot: SlotKind) -> bool;

    /// Mark a barrier over `slot` as parked or released
    fn set_barrier_active(&mut self, slot: SlotKind, active: bool);
}

/// Bounded wait over the shared pipeline bookkeeping
pub(crate) struct Barrier<'a, S> {
    state: &'a Mutex<S>,
    condvar: &'a Condvar,
    tolerance: Duration,
}

impl<'a, S: Convergence> Barrier<'a, S> {
    /// Create a barrier; `tolerance` is subtracted from every timeout so the
    /// wait returns before the caller's own deadline
    pub(crate) fn new(state: &'a Mutex<S>, condvar: &'a Condvar, tolerance: Duration) -> Self {
        Self {
            state,
            condvar,
            tolerance,
        }
    }

    fn deadline(&self, timeout: Duration) -> Instant {
        Instant::now() + timeout.saturating_sub(self.tolerance)
    }

    /// Wait until all `slot`s equal `target` on behalf of a command
    ///
    /// On success over the primary slot the aggregate state is set to
    /// `target`. The buffered asynchronous error is merged into the outcome
    /// and cleared. Only one command wait per slot kind may be parked at a
    /// time; a second one fails with [`PipelineError::Busy`].
    pub(crate) fn wait(
        &self,
        slot: SlotKind,
        target: ComponentState,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = self.deadline(timeout);
        let mut state = self.state.lock();

        if state.barrier_active(slot) {
            return Err(PipelineError::Busy);
        }
        state.set_barrier_active(slot, true);

        let outcome = self.park(&mut state, slot, target, deadline);
        if outcome.is_ok() && slot == SlotKind::Primary {
            state.set_aggregate(target);
        }

        state.set_barrier_active(slot, false);
        let async_error = state.take_async_error();
        drop(state);

        let outcome = match (outcome, async_error) {
            (Ok(()), Some(error)) => {
                debug!("Converged on {} but a component failed: {}", target, error);
                Err(error)
            }
            (outcome, _) => outcome,
        };

        debug!("Barrier over {:?} for {} finished: {:?}", slot, target, outcome);
        outcome
    }

    /// Wait until all `slot`s equal `target` without claiming the slot
    ///
    /// Observers park alongside a command wait over the same slot. The
    /// aggregate and the buffered asynchronous error are left to the command.
    pub(crate) fn observe(
        &self,
        slot: SlotKind,
        target: ComponentState,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = self.deadline(timeout);
        let mut state = self.state.lock();
        let outcome = self.park(&mut state, slot, target, deadline);
        drop(state);

        debug!("Observer over {:?} for {} finished: {:?}", slot, target, outcome);
        outcome
    }

    fn park(
        &self,
        state: &mut MutexGuard<'_, S>,
        slot: SlotKind,
        target: ComponentState,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            if state.aggregate() == target || state.converged(slot, target) {
                return Ok(());
            }

            if state.cancel_requested() {
                return Err(PipelineError::Interrupted);
            }

            if Instant::now() >= deadline {
                return Err(PipelineError::TimedOut);
            }

            trace!("Barrier parked waiting for {:?} slots to reach {}", slot, target);
            self.condvar.wait_until(state, deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Minimal bookkeeping: one slot value per component
    #[derive(Default)]
    struct Slots {
        primary: Vec<ComponentState>,
        auxiliary: Vec<ComponentState>,
        aggregate: ComponentState,
        cancel: bool,
        error: Option<PipelineError>,
        active: [bool; 2],
    }

    fn index(slot: SlotKind) -> usize {
        match slot {
            SlotKind::Primary => 0,
            SlotKind::Auxiliary => 1,
        }
    }

    impl Convergence for Slots {
        fn aggregate(&self) -> ComponentState {
            self.aggregate
        }

        fn set_aggregate(&mut self, state: ComponentState) {
            self.aggregate = state;
        }

        fn converged(&self, slot: SlotKind, target: ComponentState) -> bool {
            let slots = match slot {
                SlotKind::Primary => &self.primary,
                SlotKind::Auxiliary => &self.auxiliary,
            };
            slots.iter().all(|s| *s == target)
        }

        fn cancel_requested(&self) -> bool {
            self.cancel
        }

        fn take_async_error(&mut self) -> Option<PipelineError> {
            self.error.take()
        }

        fn barrier_active(&self, slot: SlotKind) -> bool {
            self.active[index(slot)]
        }

        fn set_barrier_active(&mut self, slot: SlotKind, active: bool) {
            self.active[index(slot)] = active;
        }
    }

    struct Shared {
        state: Mutex<Slots>,
        condvar: Condvar,
    }

    fn shared(slots: Slots) -> Arc<Shared> {
        Arc::new(Shared {
            state: Mutex::new(slots),
            condvar: Condvar::new(),
        })
    }

    const TOLERANCE: Duration = Duration::from_millis(5);

    fn wait(shared: &Shared, slot: SlotKind, target: ComponentState, timeout: Duration) -> Result<()> {
        Barrier::new(&shared.state, &shared.condvar, TOLERANCE).wait(slot, target, timeout)
    }

    #[test]
    fn test_empty_pipeline_converges_vacuously() {
        let shared = shared(Slots::default());
        assert_eq!(wait(&shared, SlotKind::Primary, ComponentState::Playing, Duration::ZERO), Ok(()));
        assert_eq!(shared.state.lock().aggregate, ComponentState::Playing);
    }

    #[test]
    fn test_auxiliary_wait_leaves_aggregate_alone() {
        let shared = shared(Slots {
            auxiliary: vec![ComponentState::FlushComplete; 2],
            aggregate: ComponentState::Playing,
            ..Slots::default()
        });
        assert_eq!(
            wait(&shared, SlotKind::Auxiliary, ComponentState::FlushComplete, Duration::from_secs(1)),
            Ok(())
        );
        assert_eq!(shared.state.lock().aggregate, ComponentState::Playing);
    }

    #[test]
    fn test_wakes_on_late_convergence() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Playing, ComponentState::Play],
            ..Slots::default()
        });

        let completer = {
            let shared = shared.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                shared.state.lock().primary[1] = ComponentState::Playing;
                shared.condvar.notify_all();
            })
        };

        let result = wait(&shared, SlotKind::Primary, ComponentState::Playing, Duration::from_secs(5));
        completer.join().unwrap();
        assert_eq!(result, Ok(()));
        assert_eq!(shared.state.lock().aggregate, ComponentState::Playing);
    }

    #[test]
    fn test_timeout_precision() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Preparing],
            ..Slots::default()
        });
        let timeout = Duration::from_millis(100);

        let started = Instant::now();
        let result = wait(&shared, SlotKind::Primary, ComponentState::Prepared, timeout);
        let elapsed = started.elapsed();

        assert_eq!(result, Err(PipelineError::TimedOut));
        assert!(elapsed >= timeout - TOLERANCE, "returned early: {elapsed:?}");
        assert!(elapsed < timeout + Duration::from_millis(200), "returned late: {elapsed:?}");
        assert!(!shared.state.lock().active[0]);
    }

    #[test]
    fn test_cancel_interrupts_parked_wait() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Stop],
            ..Slots::default()
        });

        let canceller = {
            let shared = shared.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                shared.state.lock().cancel = true;
                shared.condvar.notify_all();
            })
        };

        let started = Instant::now();
        let result = wait(&shared, SlotKind::Primary, ComponentState::Stopped, Duration::from_secs(30));
        canceller.join().unwrap();

        assert_eq!(result, Err(PipelineError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sticky_cancel_aborts_new_wait() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Pausing],
            cancel: true,
            ..Slots::default()
        });
        assert_eq!(
            wait(&shared, SlotKind::Primary, ComponentState::Paused, Duration::from_secs(30)),
            Err(PipelineError::Interrupted)
        );
    }

    #[test]
    fn test_async_error_downgrades_success_and_is_cleared() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Playing],
            error: Some(PipelineError::failed("device lost")),
            ..Slots::default()
        });

        assert_eq!(
            wait(&shared, SlotKind::Primary, ComponentState::Playing, Duration::from_secs(1)),
            Err(PipelineError::failed("device lost"))
        );
        assert!(shared.state.lock().error.is_none());
    }

    #[test]
    fn test_async_error_cleared_on_timeout() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Play],
            error: Some(PipelineError::failed("late")),
            ..Slots::default()
        });

        assert_eq!(
            wait(&shared, SlotKind::Primary, ComponentState::Playing, Duration::from_millis(20)),
            Err(PipelineError::TimedOut)
        );
        assert!(shared.state.lock().error.is_none());
    }

    #[test]
    fn test_second_wait_on_same_slot_is_busy() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Play],
            ..Slots::default()
        });
        shared.state.lock().active[0] = true;

        assert_eq!(
            wait(&shared, SlotKind::Primary, ComponentState::Playing, Duration::from_secs(1)),
            Err(PipelineError::Busy)
        );
        // The other slot kind is independent
        assert_eq!(
            wait(&shared, SlotKind::Auxiliary, ComponentState::SeekComplete, Duration::from_secs(1)),
            Ok(())
        );
    }

    #[test]
    fn test_observer_leaves_async_error_to_command() {
        let shared = shared(Slots {
            primary: vec![ComponentState::Play],
            auxiliary: vec![ComponentState::FlushComplete],
            error: Some(PipelineError::failed("device lost")),
            ..Slots::default()
        });

        let observed = Barrier::new(&shared.state, &shared.condvar, TOLERANCE).observe(
            SlotKind::Auxiliary,
            ComponentState::FlushComplete,
            Duration::from_secs(1),
        );
        assert_eq!(observed, Ok(()));

        shared.state.lock().primary[0] = ComponentState::Playing;
        assert_eq!(
            wait(&shared, SlotKind::Primary, ComponentState::Playing, Duration::from_secs(1)),
            Err(PipelineError::failed("device lost"))
        );
    }

    #[test]
    fn test_observer_shares_slot_with_command_wait() {
        let shared = shared(Slots {
            auxiliary: vec![ComponentState::Null],
            ..Slots::default()
        });

        let observer = {
            let shared = shared.clone();
            thread::spawn(move || {
                Barrier::new(&shared.state, &shared.condvar, TOLERANCE).observe(
                    SlotKind::Auxiliary,
                    ComponentState::FlushComplete,
                    Duration::from_secs(5),
                )
            })
        };
        let completer = {
            let shared = shared.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(40));
                shared.state.lock().auxiliary[0] = ComponentState::FlushComplete;
                shared.condvar.notify_all();
            })
        };

        thread::sleep(Duration::from_millis(10));
        assert_eq!(
            wait(&shared, SlotKind::Auxiliary, ComponentState::FlushComplete, Duration::from_secs(5)),
            Ok(())
        );
        completer.join().unwrap();
        assert_eq!(observer.join().unwrap(), Ok(()));
        assert!(!shared.state.lock().active[1]);
    }
}
