//! Pipeline façade
//!
//! Presents N independently-asynchronous components as one serialized state
//! machine. Lifecycle calls never block the caller: they are queued to a
//! dedicated control thread which fans each command out and waits on the
//! barrier, then reports exactly one `CommandComplete` to the listener.
//!
//! ## Architecture
//!
//! ```text
//! Caller thread             Control thread                Component threads
//!      │                          │                               │
//!      │ start() -> Pending       │                               │
//!      │─────────────────────────>│ fan-out in attach order       │
//!      │                          │──────────────────────────────>│
//!      │                          │ barrier (parked on condvar)   │
//!      │                          │<──────────────────────────────│ EventSink
//!      │                          │ converged                     │ (EventBridge)
//!      │<─────────────────────────│ CommandComplete               │
//!      │   (listener)             │                               │
//! ```
//!
//! Completion events are applied on the components' own threads, directly
//! into the shared bookkeeping; they never pass through the control queue
//! the barrier is blocking.

use crate::bridge::{EventBridge, EventTarget};
use crate::command::Command;
use crate::component::{Completion, MediaComponent};
use crate::config::PipelineConfig;
use crate::pipeline_core::PipelineCore;
use crate::error::{PipelineError, Result};
use crate::events::{PipelineListener, PipelineMessage};
use crate::record::{ComponentId, ComponentSnapshot};
use crate::state::{ComponentRole, ComponentState};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Command queued for the control thread
#[derive(Debug)]
struct ControlRequest {
    command: Command,
    timeout: Duration,
}

/// Orchestrates attached media components through a shared lifecycle
///
/// # Example
///
/// ```
/// use soul_pipeline::testing::MockComponent;
/// use soul_pipeline::{channel_listener, ComponentRole, Pipeline, PipelineConfig};
/// use std::sync::Arc;
///
/// let (listener, _messages) = channel_listener();
/// let pipeline = Pipeline::new(PipelineConfig::default(), listener)?;
/// pipeline.attach(Arc::new(MockComponent::new("source")), ComponentRole::Source)?;
///
/// pipeline.prepare()?;
/// # Ok::<(), soul_pipeline::PipelineError>(())
/// ```
pub struct Pipeline {
    core: Arc<PipelineCore>,
    bridge: Arc<EventBridge>,
    /// Taken at shutdown; dropping it ends the control loop once drained
    requests: Mutex<Option<Sender<ControlRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    shut_down: AtomicBool,
}

impl Pipeline {
    /// Create a pipeline bound to `listener` and spawn its control thread
    pub fn new(config: PipelineConfig, listener: Arc<dyn PipelineListener>) -> Result<Self> {
        config.validate()?;

        let core = Arc::new(PipelineCore::new(config.clone()));
        core.set_listener(Some(listener));

        let weak: Weak<PipelineCore> = Arc::downgrade(&core);
        let bridge = EventBridge::new(weak as Weak<dyn EventTarget>);

        let (tx, rx) = bounded::<ControlRequest>(config.command_queue_depth);
        let worker_core = core.clone();
        let worker = thread::Builder::new()
            .name(config.control_thread_name.clone())
            .spawn(move || control_loop(worker_core, rx))
            .map_err(|e| PipelineError::failed(format!("Failed to spawn control thread: {}", e)))?;

        info!(
            "Pipeline created (timeout: {:?}, queue depth: {})",
            config.command_timeout(),
            config.command_queue_depth
        );

        Ok(Self {
            core,
            bridge,
            requests: Mutex::new(Some(tx)),
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Create a pipeline with default configuration
    pub fn with_listener(listener: Arc<dyn PipelineListener>) -> Result<Self> {
        Self::new(PipelineConfig::default(), listener)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PipelineError::ShutDown);
        }
        Ok(())
    }

    // ===== Components =====

    /// Attach a unit; it joins the end of the fan-out order
    ///
    /// Fails with [`PipelineError::Busy`] while a command is queued or in
    /// flight.
    pub fn attach(
        &self,
        unit: Arc<dyn MediaComponent>,
        role: ComponentRole,
    ) -> Result<ComponentId> {
        self.ensure_running()?;
        self.core.attach(unit, role, &self.bridge)
    }

    /// Replace the outbound listener (`None` silences notifications)
    pub fn set_listener(&self, listener: Option<Arc<dyn PipelineListener>>) {
        self.core.set_listener(listener);
    }

    // ===== Lifecycle =====

    /// Queue `command`, optionally overriding the configured timeout
    ///
    /// Returns `Done` (and sends no message) when the pipeline is idle and
    /// already at the target; otherwise `Pending`, followed by exactly one
    /// [`PipelineMessage::CommandComplete`].
    pub fn submit(&self, command: Command, timeout: Option<Duration>) -> Result<Completion> {
        self.ensure_running()?;

        if !self.core.begin(command)? {
            debug!("Pipeline already {}, {} completes synchronously", command.target(), command);
            return Ok(Completion::Done);
        }

        let request = ControlRequest {
            command,
            timeout: timeout.unwrap_or_else(|| self.core.config().command_timeout()),
        };

        let sent = match self.requests.lock().as_ref() {
            Some(tx) => tx.try_send(request),
            None => Err(TrySendError::Disconnected(request)),
        };

        match sent {
            Ok(()) => {
                debug!("Queued {}", command);
                Ok(Completion::Pending)
            }
            Err(TrySendError::Full(_)) => {
                self.core.finish();
                warn!("Command queue full, rejecting {}", command);
                Err(PipelineError::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.core.finish();
                Err(PipelineError::ShutDown)
            }
        }
    }

    /// Acquire resources on every component
    pub fn prepare(&self) -> Result<Completion> {
        self.submit(Command::Prepare, None)
    }

    /// Start processing
    pub fn start(&self) -> Result<Completion> {
        self.submit(Command::Start, None)
    }

    /// Pause processing
    pub fn pause(&self) -> Result<Completion> {
        self.submit(Command::Pause, None)
    }

    /// Resume after a pause
    pub fn resume(&self) -> Result<Completion> {
        self.submit(Command::Resume, None)
    }

    /// Stop processing
    pub fn stop(&self) -> Result<Completion> {
        self.submit(Command::Stop, None)
    }

    /// Return every component to `Loaded`
    pub fn reset(&self) -> Result<Completion> {
        self.submit(Command::Reset, None)
    }

    /// Discard buffered media; completes on `FlushComplete`
    pub fn flush(&self) -> Result<Completion> {
        self.submit(Command::Flush, None)
    }

    /// Play out buffered media; completes on `EOSComplete`
    pub fn drain(&self) -> Result<Completion> {
        self.submit(Command::Drain, None)
    }

    /// Abort the wait in progress (and any wait started before the next
    /// command) with [`PipelineError::Interrupted`]
    pub fn cancel(&self) {
        debug!("Cancel requested");
        self.core.cancel();
    }

    // ===== Markers =====

    /// Reset every component's completion marker
    pub fn clear_markers(&self) -> Result<()> {
        self.ensure_running()?;
        self.core.clear_markers()
    }

    /// Block until every component reported `marker`
    ///
    /// Uses the configured timeout unless `timeout` is given.
    pub fn await_marker(&self, marker: ComponentState, timeout: Option<Duration>) -> Result<()> {
        self.ensure_running()?;
        let timeout = timeout.unwrap_or_else(|| self.core.config().command_timeout());
        self.core.await_marker(marker, timeout)
    }

    // ===== Queries =====

    /// Aggregate state
    pub fn state(&self) -> ComponentState {
        self.core.aggregate()
    }

    /// Ask every unit for its own state and reconcile the bookkeeping
    pub fn probe_state(&self) -> ComponentState {
        self.core.probe()
    }

    /// Bookkeeping snapshot per component, in attach order
    pub fn components(&self) -> Vec<ComponentSnapshot> {
        self.core.snapshot()
    }

    /// Bookkeeping snapshot of one component
    pub fn component(&self, id: ComponentId) -> Result<ComponentSnapshot> {
        self.core.component(id)
    }

    /// Configuration the pipeline was created with
    pub fn config(&self) -> &PipelineConfig {
        self.core.config()
    }

    /// Events dropped because they arrived after teardown started
    pub fn dropped_events(&self) -> u64 {
        self.bridge.dropped_events()
    }

    // ===== Teardown =====

    /// Tear the pipeline down
    ///
    /// Revokes the event bridge, cancels the wait in progress, then stops and
    /// joins the control thread. Commands still queued complete with
    /// [`PipelineError::ShutDown`]. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down pipeline");
        self.bridge.revoke();
        self.core.close();
        drop(self.requests.lock().take());

        if thread::current().id() == self.worker_id {
            // Called from a listener on the control thread; it exits on its own
            debug!("Shutdown from control thread, not joining");
            return;
        }

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Pipeline control thread panicked");
            }
        }
    }

    /// Whether [`Pipeline::shutdown`] has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("components", &self.components().len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Control thread: runs queued commands one at a time
fn control_loop(core: Arc<PipelineCore>, requests: Receiver<ControlRequest>) {
    debug!("Pipeline control thread started");

    while let Ok(ControlRequest { command, timeout }) = requests.recv() {
        let result = core.run_lifecycle_command(command, timeout);
        let state = core.aggregate();

        match &result {
            Ok(()) => debug!("{} complete, pipeline {}", command, state),
            Err(e) => warn!("{} failed: {}", command, e),
        }

        core.finish();
        core.notify(PipelineMessage::CommandComplete {
            command,
            result,
            state,
        });
    }

    debug!("Pipeline control thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::channel_listener;
    use crate::testing::{MockComponent, Response};
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    /// Wait until the control thread has issued a command to `unit`
    fn wait_invoked(unit: &MockComponent) {
        let deadline = Instant::now() + WAIT;
        while unit.invocations().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn pipeline() -> (Pipeline, Receiver<PipelineMessage>) {
        let (listener, rx) = channel_listener();
        (Pipeline::new(PipelineConfig::default(), listener).unwrap(), rx)
    }

    fn next_complete(rx: &Receiver<PipelineMessage>) -> (Command, Result<()>, ComponentState) {
        loop {
            match rx.recv_timeout(WAIT).unwrap() {
                PipelineMessage::CommandComplete {
                    command,
                    result,
                    state,
                } => return (command, result, state),
                _ => continue,
            }
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let (listener, _rx) = channel_listener();
        let config = PipelineConfig {
            command_queue_depth: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(Pipeline::new(config, listener), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_command_reports_through_listener() {
        let (pipeline, rx) = pipeline();
        pipeline
            .attach(Arc::new(MockComponent::new("source")), ComponentRole::Source)
            .unwrap();

        assert_eq!(pipeline.prepare(), Ok(Completion::Pending));
        let (command, result, state) = next_complete(&rx);
        assert_eq!(command, Command::Prepare);
        assert_eq!(result, Ok(()));
        assert_eq!(state, ComponentState::Prepared);
        assert_eq!(pipeline.state(), ComponentState::Prepared);
    }

    #[test]
    fn test_idle_at_target_completes_synchronously() {
        let (pipeline, rx) = pipeline();
        pipeline.prepare().unwrap();
        next_complete(&rx);

        assert_eq!(pipeline.prepare(), Ok(Completion::Done));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_attach_while_in_flight_is_busy() {
        let (pipeline, rx) = pipeline();
        let renderer =
            Arc::new(MockComponent::new("renderer").respond(Command::Start, Response::Pending));
        pipeline.attach(renderer.clone(), ComponentRole::Sink).unwrap();

        pipeline.start().unwrap();
        assert_eq!(
            pipeline.attach(Arc::new(MockComponent::new("late")), ComponentRole::Filter),
            Err(PipelineError::Busy)
        );

        wait_invoked(&renderer);
        pipeline.cancel();
        let (_, result, _) = next_complete(&rx);
        assert_eq!(result, Err(PipelineError::Interrupted));
        assert!(pipeline
            .attach(Arc::new(MockComponent::new("late")), ComponentRole::Filter)
            .is_ok());
    }

    #[test]
    fn test_full_queue_is_busy() {
        let (listener, rx) = channel_listener();
        let config = PipelineConfig {
            command_queue_depth: 1,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config, listener).unwrap();
        let renderer =
            Arc::new(MockComponent::new("renderer").respond(Command::Prepare, Response::Pending));
        pipeline.attach(renderer.clone(), ComponentRole::Sink).unwrap();

        // First one parks in the barrier, second fills the queue
        assert_eq!(pipeline.prepare(), Ok(Completion::Pending));
        wait_invoked(&renderer);
        assert_eq!(pipeline.start(), Ok(Completion::Pending));
        assert_eq!(pipeline.stop(), Err(PipelineError::Busy));

        renderer.complete(ComponentState::Prepared);
        assert_eq!(next_complete(&rx).0, Command::Prepare);
        assert_eq!(next_complete(&rx).0, Command::Start);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_final() {
        let (pipeline, _rx) = pipeline();
        pipeline.shutdown();
        pipeline.shutdown();

        assert!(pipeline.is_shut_down());
        assert_eq!(pipeline.start(), Err(PipelineError::ShutDown));
        assert_eq!(
            pipeline.attach(Arc::new(MockComponent::new("source")), ComponentRole::Source),
            Err(PipelineError::ShutDown)
        );
        assert_eq!(pipeline.state(), ComponentState::Null);
    }

    #[test]
    fn test_shutdown_interrupts_parked_command() {
        let (pipeline, rx) = pipeline();
        let renderer =
            Arc::new(MockComponent::new("renderer").respond(Command::Start, Response::Pending));
        pipeline.attach(renderer.clone(), ComponentRole::Sink).unwrap();
        pipeline.start().unwrap();

        pipeline.shutdown();
        let (_, result, _) = next_complete(&rx);
        assert!(matches!(
            result,
            Err(PipelineError::Interrupted) | Err(PipelineError::ShutDown)
        ));

        // Late completion after revoke is dropped
        assert!(!renderer.complete(ComponentState::Playing));
        assert_eq!(pipeline.dropped_events(), 1);
    }
}
