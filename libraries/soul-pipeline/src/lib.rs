//! Soul Pipeline - lifecycle orchestration for media components
//!
//! Drives a set of independently-asynchronous components (sources, filters,
//! sinks, each usually backed by its own thread or device) through one shared
//! lifecycle, and presents the caller with a single serialized state machine.
//!
//! # Architecture
//!
//! - [`Pipeline`]: façade; queues commands to a dedicated control thread
//! - fan-out: each command is issued to every component in attach order;
//!   a synchronous failure aborts the remaining ones
//! - barrier: the control thread blocks until every component converged,
//!   the wait is cancelled, or the deadline passes
//! - [`EventBridge`]: revocable relay carrying completion and failure events
//!   from component threads into the shared bookkeeping
//!
//! Exactly one [`PipelineMessage::CommandComplete`] is delivered per command
//! that returned [`Completion::Pending`].
//!
//! # Example
//!
//! ```
//! use soul_pipeline::testing::{MockComponent, Response};
//! use soul_pipeline::{
//!     channel_listener, Command, ComponentRole, ComponentState, Pipeline, PipelineConfig,
//!     PipelineMessage,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let (listener, messages) = channel_listener();
//! let pipeline = Pipeline::new(PipelineConfig::default(), listener)?;
//!
//! let renderer = Arc::new(MockComponent::new("renderer").respond(
//!     Command::Start,
//!     Response::CompleteAfter(Duration::from_millis(10)),
//! ));
//! pipeline.attach(Arc::new(MockComponent::new("source")), ComponentRole::Source)?;
//! pipeline.attach(renderer, ComponentRole::Sink)?;
//!
//! assert!(pipeline.start()?.is_pending());
//!
//! match messages.recv_timeout(Duration::from_secs(5)) {
//!     Ok(PipelineMessage::CommandComplete { result, state, .. }) => {
//!         assert!(result.is_ok());
//!         assert_eq!(state, ComponentState::Playing);
//!     }
//!     other => panic!("unexpected message: {:?}", other),
//! }
//! # Ok::<(), soul_pipeline::PipelineError>(())
//! ```

mod barrier;
mod bridge;
mod command;
mod component;
mod config;
mod error;
mod events;
mod pipeline;
mod pipeline_core;
mod record;
mod state;

pub mod testing;

pub use bridge::{ComponentEvent, EventBridge, EventSink, Payload};
pub use command::Command;
pub use component::{Completion, MediaComponent};
pub use self::config::{PipelineConfig, ENV_PREFIX};
pub use error::{PipelineError, Result};
pub use events::{
    channel_listener, PipelineListener, PipelineMessage, EVENT_COMMAND_COMPLETE,
    EVENT_COMPONENT_ERROR, EVENT_INFO,
};
pub use pipeline::Pipeline;
pub use record::{ComponentId, ComponentSnapshot, SlotKind};
pub use state::{ComponentRole, ComponentState};
