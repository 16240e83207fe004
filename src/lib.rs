//! Event-sourcing persistence for action-dispatch pipelines.
//!
//! Actions stamped with an event envelope (see [`create_event_action`]) are
//! appended to a durable log by [`EventSourcingMiddleware`] as they are
//! dispatched. Dispatching [`action::load_events`] on startup replays the log
//! through the same reducers, rebuilding state.

pub mod action;
pub mod config;
mod error;
mod event;
mod middleware;
mod pipeline;
pub mod storage;
mod store;

pub use action::Action;
pub use error::{NotAnEvent, StorageError, StoreError};
pub use event::{
    DEFAULT_VERSION, ENVELOPE_FIELD, Envelope, EnvelopeBuilder, EventAction, IdGenerator,
    META_FIELD, UuidGenerator, create_event_action, is_event,
};
pub use middleware::{EventSourcingBuilder, EventSourcingMiddleware, ReplayState};
pub use pipeline::{Dispatcher, Middleware, Next, Pipeline, PipelineBuilder, ReduceFn};
pub use storage::{FileStorage, LockMode, MemoryStorage, Storage};
pub use store::EventStore;
