//! Event Bridge
//!
//! Relays events arriving concurrently from component threads into the
//! pipeline's single bookkeeping path.
//!
//! ## Architecture
//!
//! ```text
//! Component threads            EventBridge              PipelineCore
//!        │                          │                         │
//!        │  sink.send(event)        │                         │
//!        │─────────────────────────>│ lock, upgrade target    │
//!        │                          │────────────────────────>│ ingest (slot update,
//!        │                          │                         │ async error, notify)
//!        │                          │ unlock                  │
//!        │                          │────────────────────────>│ forward to listener
//! ```
//!
//! The back-reference is weak (components hold sinks, the pipeline holds
//! components) and revocable: after [`EventBridge::revoke`] returns, no
//! delivery mutates pipeline state.

use crate::error::PipelineError;
use crate::events::PipelineMessage;
use crate::record::ComponentId;
use crate::state::ComponentState;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Opaque payload attached to informational events
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Notification emitted by a component
#[derive(Debug, Clone)]
pub enum ComponentEvent {
    /// The component reached a state: a lifecycle state (primary slot) or a
    /// completion marker (auxiliary slot)
    StateReached(ComponentState),

    /// The component failed asynchronously
    Error(PipelineError),

    /// Component-specific notification, forwarded to the pipeline owner
    Info {
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

/// Ingestion point the bridge forwards into
pub(crate) trait EventTarget: Send + Sync {
    /// Apply an event to bookkeeping; returns a message to forward to the owner
    fn ingest(&self, sender: ComponentId, event: ComponentEvent) -> Option<PipelineMessage>;

    /// Hand a message to the owner (called without the bridge lock held)
    fn forward(&self, message: PipelineMessage);
}

/// Revocable relay from component threads to the pipeline
pub struct EventBridge {
    target: Mutex<Option<Weak<dyn EventTarget>>>,
    dropped: AtomicU64,
}

impl EventBridge {
    pub(crate) fn new(target: Weak<dyn EventTarget>) -> Arc<Self> {
        Arc::new(Self {
            target: Mutex::new(Some(target)),
            dropped: AtomicU64::new(0),
        })
    }

    /// Deliver an event from `sender`
    ///
    /// Returns `false` if the event was dropped because the bridge has been
    /// revoked or the pipeline is gone.
    pub fn deliver(&self, sender: ComponentId, event: ComponentEvent) -> bool {
        let (target, forward) = {
            let guard = self.target.lock();
            let Some(target) = guard.as_ref().and_then(Weak::upgrade) else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping {:?} from {}: bridge revoked", event, sender);
                return false;
            };
            trace!("Delivering {:?} from {}", event, sender);
            let forward = target.ingest(sender, event);
            (target, forward)
        };

        if let Some(message) = forward {
            target.forward(message);
        }
        true
    }

    /// Cut the back-reference; later deliveries become no-ops
    ///
    /// Waits for any delivery currently inside the ingestion point.
    pub fn revoke(&self) {
        let previous = self.target.lock().take();
        if previous.is_some() {
            debug!("Event bridge revoked");
        }
    }

    /// Whether [`revoke`](Self::revoke) has been called
    pub fn is_revoked(&self) -> bool {
        self.target.lock().is_none()
    }

    /// Number of events dropped so far
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("revoked", &self.is_revoked())
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

/// A component's handle on the bridge, bound at attach time
#[derive(Debug, Clone)]
pub struct EventSink {
    id: ComponentId,
    bridge: Arc<EventBridge>,
}

impl EventSink {
    pub(crate) fn new(id: ComponentId, bridge: Arc<EventBridge>) -> Self {
        Self { id, bridge }
    }

    /// Handle of the component this sink belongs to
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Send an event; returns `false` if it was dropped
    pub fn send(&self, event: ComponentEvent) -> bool {
        self.bridge.deliver(self.id, event)
    }

    /// Report that a state (or completion marker) was reached
    pub fn state_reached(&self, state: ComponentState) -> bool {
        self.send(ComponentEvent::StateReached(state))
    }

    /// Report an asynchronous failure
    pub fn error(&self, error: PipelineError) -> bool {
        self.send(ComponentEvent::Error(error))
    }

    /// Send a component-specific notification to the pipeline owner
    pub fn info(&self, code: i32, param1: i32, param2: i32, payload: Option<Payload>) -> bool {
        self.send(ComponentEvent::Info {
            code,
            param1,
            param2,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Default)]
    struct CountingTarget {
        ingested: AtomicUsize,
        forwarded: AtomicUsize,
    }

    impl EventTarget for CountingTarget {
        fn ingest(&self, sender: ComponentId, event: ComponentEvent) -> Option<PipelineMessage> {
            self.ingested.fetch_add(1, Ordering::SeqCst);
            match event {
                ComponentEvent::Error(error) => Some(PipelineMessage::ComponentError {
                    component: sender,
                    error,
                }),
                _ => None,
            }
        }

        fn forward(&self, _message: PipelineMessage) {
            self.forwarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bridge_for(target: &Arc<CountingTarget>) -> Arc<EventBridge> {
        let weak: Weak<dyn EventTarget> = Arc::downgrade(target) as Weak<dyn EventTarget>;
        EventBridge::new(weak)
    }

    #[test]
    fn test_deliver_forwards_into_target() {
        let target = Arc::new(CountingTarget::default());
        let bridge = bridge_for(&target);
        let sink = EventSink::new(ComponentId::from_raw(0), bridge.clone());

        assert!(sink.state_reached(ComponentState::Playing));
        assert!(sink.error(PipelineError::failed("underrun")));

        assert_eq!(target.ingested.load(Ordering::SeqCst), 2);
        assert_eq!(target.forwarded.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.dropped_events(), 0);
    }

    #[test]
    fn test_revoke_drops_later_deliveries() {
        let target = Arc::new(CountingTarget::default());
        let bridge = bridge_for(&target);
        let sink = EventSink::new(ComponentId::from_raw(0), bridge.clone());

        bridge.revoke();
        assert!(bridge.is_revoked());
        assert!(!sink.state_reached(ComponentState::Playing));
        assert_eq!(target.ingested.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.dropped_events(), 1);

        // Revoking twice is harmless
        bridge.revoke();
    }

    #[test]
    fn test_dead_target_is_dropped() {
        let target = Arc::new(CountingTarget::default());
        let bridge = bridge_for(&target);
        drop(target);

        assert!(!bridge.deliver(
            ComponentId::from_raw(4),
            ComponentEvent::StateReached(ComponentState::Stopped)
        ));
        assert_eq!(bridge.dropped_events(), 1);
    }

    #[test]
    fn test_concurrent_deliveries_after_revoke_never_mutate() {
        let target = Arc::new(CountingTarget::default());
        let bridge = bridge_for(&target);
        bridge.revoke();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let sink = EventSink::new(ComponentId::from_raw(n), bridge.clone());
                thread::spawn(move || {
                    for _ in 0..500 {
                        sink.state_reached(ComponentState::Playing);
                        sink.error(PipelineError::failed("late"));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(target.ingested.load(Ordering::SeqCst), 0);
        assert_eq!(target.forwarded.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.dropped_events(), 8 * 500 * 2);
    }

    #[test]
    fn test_revoke_races_with_deliveries() {
        let target = Arc::new(CountingTarget::default());
        let bridge = bridge_for(&target);

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let sink = EventSink::new(ComponentId::from_raw(n), bridge.clone());
                thread::spawn(move || {
                    for _ in 0..1000 {
                        sink.state_reached(ComponentState::Paused);
                    }
                })
            })
            .collect();

        bridge.revoke();
        let ingested_at_revoke = target.ingested.load(Ordering::SeqCst);

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(target.ingested.load(Ordering::SeqCst), ingested_at_revoke);
        assert_eq!(
            ingested_at_revoke as u64 + bridge.dropped_events(),
            4 * 1000
        );
    }
}
