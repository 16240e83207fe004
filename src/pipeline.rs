use crate::action::Action;
use std::sync::{Arc, Mutex, PoisonError};

/// A pure function that folds an action into state.
///
/// Reducers receive owned state and return owned state. They should be pure
/// (no I/O, no side effects) and leave unknown action types alone with a
/// `_ => state` arm, since replay feeds them every historical event.
///
/// # Examples
///
/// ```
/// use eventstash::{Action, ReduceFn};
///
/// fn counter(state: u64, action: &Action) -> u64 {
///     match action.action_type() {
///         Some("counter/increment") => state + 1,
///         _ => state,
///     }
/// }
///
/// let reducer: ReduceFn<u64> = counter;
/// ```
pub type ReduceFn<S> = fn(S, &Action) -> S;

/// A stage in the dispatch pipeline.
///
/// A middleware sees every dispatched action before the reducer does. It may
/// start side effects, dispatch further actions through `dispatcher`, and
/// hands the action on with [`Next::run`]. Not calling `next` swallows the
/// action.
pub trait Middleware<S>: Send + Sync {
    fn handle(&self, dispatcher: &Dispatcher<S>, action: Action, next: Next<'_, S>);
}

struct Shared<S> {
    state: Mutex<S>,
    reducer: ReduceFn<S>,
    middleware: Vec<Arc<dyn Middleware<S>>>,
}

/// Handle for dispatching actions and reading state.
///
/// Dispatch is synchronous: when [`Dispatcher::dispatch`] returns, every
/// middleware has run and the reducer has applied the action (unless a
/// middleware swallowed it). Handles are cheap to clone and can be moved into
/// spawned tasks.
pub struct Dispatcher<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Dispatcher {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("middleware", &self.shared.middleware.len())
            .finish_non_exhaustive()
    }
}

impl<S: Default> Dispatcher<S> {
    /// Send `action` through every middleware, then the reducer.
    pub fn dispatch(&self, action: Action) {
        self.run_from(0, action);
    }

    fn run_from(&self, index: usize, action: Action) {
        match self.shared.middleware.get(index) {
            Some(middleware) => {
                let next = Next {
                    dispatcher: self,
                    index: index + 1,
                };
                middleware.handle(self, action, next);
            }
            None => self.reduce(&action),
        }
    }

    fn reduce(&self, action: &Action) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = std::mem::take(&mut *state);
        *state = (self.shared.reducer)(current, action);
    }
}

impl<S> Dispatcher<S> {
    /// Run `f` against the current state.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Return a copy of the current state.
    pub fn get_state(&self) -> S
    where
        S: Clone,
    {
        self.with_state(S::clone)
    }
}

/// The remainder of the pipeline after the current middleware.
pub struct Next<'a, S> {
    dispatcher: &'a Dispatcher<S>,
    index: usize,
}

impl<S: Default> Next<'_, S> {
    /// Pass `action` to the next middleware, or to the reducer if this was the last.
    pub fn run(self, action: Action) {
        self.dispatcher.run_from(self.index, action);
    }
}

/// Builder for a [`Pipeline`].
pub struct PipelineBuilder<S> {
    initial: S,
    reducer: ReduceFn<S>,
    middleware: Vec<Arc<dyn Middleware<S>>>,
}

impl<S> PipelineBuilder<S> {
    /// Append a middleware. Middleware run in the order they were added.
    pub fn middleware(mut self, middleware: impl Middleware<S> + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append a middleware that is shared with the caller.
    pub fn shared_middleware(mut self, middleware: Arc<dyn Middleware<S>>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> Pipeline<S> {
        Pipeline {
            dispatcher: Dispatcher {
                shared: Arc::new(Shared {
                    state: Mutex::new(self.initial),
                    reducer: self.reducer,
                    middleware: self.middleware,
                }),
            },
        }
    }
}

/// A state container with a middleware chain in front of its reducer.
///
/// Dispatching requires `S: Default`: the reducer takes the state by value
/// and the slot is briefly left at its default while it runs.
///
/// This is the host the event-sourcing middleware plugs into. Dereferences to
/// its [`Dispatcher`].
pub struct Pipeline<S> {
    dispatcher: Dispatcher<S>,
}

impl<S> Pipeline<S> {
    pub fn builder(initial: S, reducer: ReduceFn<S>) -> PipelineBuilder<S> {
        PipelineBuilder {
            initial,
            reducer,
            middleware: Vec::new(),
        }
    }

    /// A clonable dispatch handle onto this pipeline.
    pub fn dispatcher(&self) -> Dispatcher<S> {
        self.dispatcher.clone()
    }
}

impl<S> std::ops::Deref for Pipeline<S> {
    type Target = Dispatcher<S>;

    fn deref(&self) -> &Self::Target {
        &self.dispatcher
    }
}
