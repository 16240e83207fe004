use crate::action::{self, Action, LOAD_EVENTS, LOAD_EVENTS_DONE, LOAD_EVENTS_FAILED};
use crate::error::StoreError;
use crate::event::EventAction;
use crate::pipeline::{Dispatcher, Middleware, Next};
use crate::storage::{MemoryStorage, Storage};
use crate::store::EventStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Where the middleware is in the replay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Normal operation: events are persisted as they pass.
    Idle,
    /// A replay is running: events pass through without being persisted.
    Loading,
}

/// Per-instance replay flag.
#[derive(Debug, Default)]
struct ReplaySession {
    loading: AtomicBool,
}

impl ReplaySession {
    /// Enter `Loading`. Returns `false` if a replay was already running.
    fn begin(&self) -> bool {
        self.loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.loading.store(false, Ordering::Release);
    }

    fn state(&self) -> ReplayState {
        if self.loading.load(Ordering::Acquire) {
            ReplayState::Loading
        } else {
            ReplayState::Idle
        }
    }
}

/// Builder for [`EventSourcingMiddleware`].
pub struct EventSourcingBuilder {
    key: String,
    storage: Option<Arc<dyn Storage>>,
}

impl std::fmt::Debug for EventSourcingBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcingBuilder")
            .field("key", &self.key)
            .field("custom_storage", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

impl EventSourcingBuilder {
    /// Use `storage` as the backing capability instead of in-process memory.
    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Use an already shared storage handle.
    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Open the event store and build the middleware.
    ///
    /// Must be called inside a Tokio runtime; persistence and replay tasks are
    /// spawned onto it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoRuntime`] when called outside a runtime.
    pub fn build(self) -> Result<EventSourcingMiddleware, StoreError> {
        let runtime = Handle::try_current()?;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let store = EventStore::open(self.key, storage)?;
        Ok(EventSourcingMiddleware {
            store,
            session: ReplaySession::default(),
            runtime,
        })
    }
}

/// Pipeline middleware that persists events and replays them on request.
///
/// - A [`LOAD_EVENTS`] action starts a replay: the stored log is read and
///   each event is dispatched in order, followed by [`LOAD_EVENTS_DONE`].
/// - While a replay runs, events pass through without being appended, so
///   replayed history is never written twice.
/// - Otherwise every action that [`is_event`](crate::is_event) accepts is
///   appended in the background. A failed append dispatches
///   [`PERSIST_EVENT_FAILED`](crate::action::PERSIST_EVENT_FAILED).
///
/// Every action is forwarded to the next stage, whatever happens to its
/// persistence.
pub struct EventSourcingMiddleware {
    store: EventStore,
    session: ReplaySession,
    runtime: Handle,
}

impl std::fmt::Debug for EventSourcingMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcingMiddleware")
            .field("key", &self.store.key())
            .field("state", &self.session.state())
            .finish()
    }
}

impl EventSourcingMiddleware {
    /// Start building a middleware that keeps its log under `key`.
    pub fn builder(key: impl Into<String>) -> EventSourcingBuilder {
        EventSourcingBuilder {
            key: key.into(),
            storage: None,
        }
    }

    /// The event store this middleware appends to.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn replay_state(&self) -> ReplayState {
        self.session.state()
    }

    fn start_replay<S>(&self, dispatcher: &Dispatcher<S>)
    where
        S: Default + Send + 'static,
    {
        if !self.session.begin() {
            log::debug!("replay of '{}' already running", self.store.key());
            return;
        }
        log::debug!("replaying events from '{}'", self.store.key());

        let store = self.store.clone();
        let dispatcher = dispatcher.clone();
        self.runtime.spawn(async move {
            match store.load_all().await {
                Ok(events) => {
                    let count = events.len();
                    for event in events {
                        dispatcher.dispatch(event.into_action());
                    }
                    log::debug!("replayed {count} events from '{}'", store.key());
                    dispatcher.dispatch(action::load_events_done());
                }
                Err(e) => {
                    log::error!("failed to load events from '{}': {e}", store.key());
                    dispatcher.dispatch(action::load_events_failed(&e));
                }
            }
        });
    }

    fn persist<S>(&self, dispatcher: &Dispatcher<S>, event: EventAction)
    where
        S: Default + Send + 'static,
    {
        let id = event.id().to_string();
        // Enqueue now so appends keep dispatch order.
        let pending = self.store.append(event);
        let dispatcher = dispatcher.clone();
        let key = self.store.key().to_string();
        self.runtime.spawn(async move {
            if let Err(e) = pending.await {
                log::warn!("failed to persist event {id} to '{key}': {e}");
                dispatcher.dispatch(action::persist_event_failed(&e));
            }
        });
    }
}

impl<S> Middleware<S> for EventSourcingMiddleware
where
    S: Default + Send + 'static,
{
    fn handle(&self, dispatcher: &Dispatcher<S>, action: Action, next: Next<'_, S>) {
        match action.action_type() {
            Some(LOAD_EVENTS) => self.start_replay(dispatcher),
            Some(LOAD_EVENTS_DONE | LOAD_EVENTS_FAILED) => self.session.finish(),
            _ => {}
        }

        if self.session.state() == ReplayState::Idle {
            match EventAction::try_from(action.clone()) {
                Ok(event) => self.persist(dispatcher, event),
                Err(_) => log::trace!("not an event: {:?}", action.action_type()),
            }
        }

        next.run(action);
    }
}
