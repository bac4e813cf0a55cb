//! Mock components for exercising pipelines
//!
//! [`MockComponent`] answers every lifecycle operation according to a
//! scripted [`Response`] (synchronous success by default) and records the
//! commands it received. Several mocks can share an [`InvocationLog`] to
//! assert cross-component ordering.
//!
//! Delayed responses complete from a freshly spawned thread, the way a real
//! decoder or renderer reports back from its own worker.

use crate::bridge::{ComponentEvent, EventSink, Payload};
use crate::command::Command;
use crate::component::{Completion, MediaComponent};
use crate::error::{PipelineError, Result};
use crate::state::ComponentState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Scripted answer to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Complete synchronously
    Done,
    /// Report `Pending` and never complete (until [`MockComponent::complete`])
    Pending,
    /// Fail synchronously
    Fail(PipelineError),
    /// Emit the completion event from inside the call, then report `Pending`
    CompleteInline,
    /// Report `Pending`, then complete from another thread after a delay
    CompleteAfter(Duration),
    /// Report `Pending`, then fail from another thread after a delay
    FailAfter(Duration, PipelineError),
}

/// Shared, ordered record of `(component name, command)` invocations
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    entries: Arc<Mutex<Vec<(String, Command)>>>,
}

impl InvocationLog {
    fn record(&self, name: &str, command: Command) {
        self.entries.lock().push((name.to_string(), command));
    }

    /// Every invocation so far, in call order
    pub fn entries(&self) -> Vec<(String, Command)> {
        self.entries.lock().clone()
    }

    /// Names of the components that received `command`, in call order
    pub fn names_for(&self, command: Command) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, c)| *c == command)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Scriptable [`MediaComponent`]
#[derive(Debug)]
pub struct MockComponent {
    name: String,
    responses: Mutex<HashMap<Command, Response>>,
    sink: Mutex<Option<EventSink>>,
    state: Arc<Mutex<ComponentState>>,
    invocations: Mutex<Vec<Command>>,
    log: Option<InvocationLog>,
}

impl MockComponent {
    /// Create a mock that completes every command synchronously
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(HashMap::new()),
            sink: Mutex::new(None),
            state: Arc::new(Mutex::new(ComponentState::Null)),
            invocations: Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// Create a mock that also appends to a shared log
    pub fn with_log(name: impl Into<String>, log: InvocationLog) -> Self {
        Self {
            log: Some(log),
            ..Self::new(name)
        }
    }

    /// Builder-style [`set_response`](Self::set_response)
    pub fn respond(self, command: Command, response: Response) -> Self {
        self.set_response(command, response);
        self
    }

    /// Script the answer to `command`
    pub fn set_response(&self, command: Command, response: Response) {
        self.responses.lock().insert(command, response);
    }

    /// Override the state reported by [`MediaComponent::state`]
    pub fn set_state(&self, state: ComponentState) {
        *self.state.lock() = state;
    }

    /// Commands received so far, in call order
    pub fn invocations(&self) -> Vec<Command> {
        self.invocations.lock().clone()
    }

    /// Sink bound at attach time, if any
    pub fn sink(&self) -> Option<EventSink> {
        self.sink.lock().clone()
    }

    /// Report that `state` was reached
    ///
    /// Returns `false` if the mock is not attached or the event was dropped.
    pub fn complete(&self, state: ComponentState) -> bool {
        apply(&self.state, state);
        self.emit(ComponentEvent::StateReached(state))
    }

    /// Report an asynchronous failure
    pub fn fail(&self, error: PipelineError) -> bool {
        self.emit(ComponentEvent::Error(error))
    }

    /// Send a component-specific notification
    pub fn info(&self, code: i32, param1: i32, param2: i32, payload: Option<Payload>) -> bool {
        self.emit(ComponentEvent::Info {
            code,
            param1,
            param2,
            payload,
        })
    }

    /// Send an arbitrary event
    pub fn emit(&self, event: ComponentEvent) -> bool {
        match self.sink() {
            Some(sink) => sink.send(event),
            None => false,
        }
    }

    fn answer(&self, command: Command) -> Result<Completion> {
        self.invocations.lock().push(command);
        if let Some(log) = &self.log {
            log.record(&self.name, command);
        }

        let response = self
            .responses
            .lock()
            .get(&command)
            .cloned()
            .unwrap_or(Response::Done);
        let target = command.target();

        match response {
            Response::Done => {
                apply(&self.state, target);
                Ok(Completion::Done)
            }
            Response::Pending => Ok(Completion::Pending),
            Response::Fail(error) => Err(error),
            Response::CompleteInline => {
                self.complete(target);
                Ok(Completion::Pending)
            }
            Response::CompleteAfter(delay) => {
                self.later(delay, ComponentEvent::StateReached(target));
                Ok(Completion::Pending)
            }
            Response::FailAfter(delay, error) => {
                self.later(delay, ComponentEvent::Error(error));
                Ok(Completion::Pending)
            }
        }
    }

    fn later(&self, delay: Duration, event: ComponentEvent) {
        let Some(sink) = self.sink() else {
            return;
        };
        let state = self.state.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if let ComponentEvent::StateReached(reached) = &event {
                apply(&state, *reached);
            }
            sink.send(event);
        });
    }
}

/// Track lifecycle states; markers leave the unit's state alone
fn apply(state: &Mutex<ComponentState>, reached: ComponentState) {
    if !reached.is_completion_marker() {
        *state.lock() = reached;
    }
}

impl MediaComponent for MockComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn prepare(&self) -> Result<Completion> {
        self.answer(Command::Prepare)
    }

    fn start(&self) -> Result<Completion> {
        self.answer(Command::Start)
    }

    fn pause(&self) -> Result<Completion> {
        self.answer(Command::Pause)
    }

    fn resume(&self) -> Result<Completion> {
        self.answer(Command::Resume)
    }

    fn stop(&self) -> Result<Completion> {
        self.answer(Command::Stop)
    }

    fn reset(&self) -> Result<Completion> {
        self.answer(Command::Reset)
    }

    fn flush(&self) -> Result<Completion> {
        self.answer(Command::Flush)
    }

    fn drain(&self) -> Result<Completion> {
        self.answer(Command::Drain)
    }

    fn state(&self) -> ComponentState {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_synchronous_success() {
        let mock = MockComponent::new("source");
        assert_eq!(mock.prepare(), Ok(Completion::Done));
        assert_eq!(mock.state(), ComponentState::Prepared);
        assert_eq!(mock.flush(), Ok(Completion::Done));
        assert_eq!(mock.state(), ComponentState::Prepared, "markers keep state");
    }

    #[test]
    fn test_scripted_responses() {
        let mock = MockComponent::new("renderer")
            .respond(Command::Start, Response::Pending)
            .respond(Command::Stop, Response::Fail(PipelineError::failed("busy device")));

        assert_eq!(mock.start(), Ok(Completion::Pending));
        assert_eq!(mock.stop(), Err(PipelineError::failed("busy device")));
        assert_eq!(mock.invocations(), vec![Command::Start, Command::Stop]);
    }

    #[test]
    fn test_unattached_mock_cannot_emit() {
        let mock = MockComponent::new("decoder");
        assert!(mock.sink().is_none());
        assert!(!mock.complete(ComponentState::Playing));
        assert_eq!(mock.state(), ComponentState::Playing);
    }

    #[test]
    fn test_shared_log_orders_across_components() {
        let log = InvocationLog::default();
        let a = MockComponent::with_log("a", log.clone());
        let b = MockComponent::with_log("b", log.clone());

        b.pause().unwrap();
        a.pause().unwrap();
        a.stop().unwrap();

        assert_eq!(log.names_for(Command::Pause), vec!["b", "a"]);
        assert_eq!(log.len(), 3);
        assert!(!log.is_empty());
    }
}
