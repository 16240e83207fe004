use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Dispatched to start replaying the stored log through the pipeline.
pub const LOAD_EVENTS: &str = "EVENT-SOURCING/load-events";

/// Dispatched by the middleware after the last replayed event.
pub const LOAD_EVENTS_DONE: &str = "EVENT-SOURCING/load-events-done";

/// Dispatched by the middleware when reading the log for replay fails.
pub const LOAD_EVENTS_FAILED: &str = "EVENT-SOURCING/load-events-failed";

/// Dispatched by the middleware when appending an event fails.
pub const PERSIST_EVENT_FAILED: &str = "EVENT-SOURCING/persist-event-failed";

/// An application action flowing through the dispatch pipeline.
///
/// Actions are plain JSON values. By convention they are objects with a
/// string `type` discriminator; everything else (payload shape, `meta`) is
/// owned by the application. Serialized transparently, so an `Action` is
/// byte-for-byte the JSON the application put in.
///
/// # Examples
///
/// ```
/// use eventstash::Action;
/// use serde_json::json;
///
/// let action = Action::new("todo/added").with_payload(json!({"title": "buy milk"}));
/// assert_eq!(action.action_type(), Some("todo/added"));
/// assert_eq!(action.get("payload").unwrap()["title"], "buy milk");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(Value);

impl Action {
    /// Create an action object carrying only its `type`.
    pub fn new(action_type: &str) -> Self {
        Action(json!({ "type": action_type }))
    }

    /// Set the conventional `payload` field.
    pub fn with_payload(self, payload: Value) -> Self {
        self.with_field("payload", payload)
    }

    /// Set an arbitrary top-level field.
    ///
    /// If the action is not a JSON object it is replaced by an object holding
    /// only this field.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        match &mut self.0 {
            Value::Object(map) => {
                map.insert(name.to_string(), value);
            }
            other => {
                let mut map = Map::new();
                map.insert(name.to_string(), value);
                *other = Value::Object(map);
            }
        }
        self
    }

    /// The `type` discriminator, if present and a string.
    pub fn action_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Look up a top-level field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Borrow the underlying JSON.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the action, returning the underlying JSON.
    pub fn into_value(self) -> Value {
        self.0
    }

    pub(crate) fn as_object(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }
}

impl From<Value> for Action {
    fn from(value: Value) -> Self {
        Action(value)
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        action.0
    }
}

/// Build the action that asks the event-sourcing middleware to replay the log.
pub fn load_events() -> Action {
    Action::new(LOAD_EVENTS)
}

/// Build the replay-completion signal.
pub fn load_events_done() -> Action {
    Action::new(LOAD_EVENTS_DONE)
}

/// Build the failure action dispatched when replay could not read the log.
pub fn load_events_failed(error: &StoreError) -> Action {
    Action::new(LOAD_EVENTS_FAILED).with_field("error", error_detail(error))
}

/// Build the failure action dispatched when an append fails.
pub fn persist_event_failed(error: &StoreError) -> Action {
    Action::new(PERSIST_EVENT_FAILED).with_field("error", error_detail(error))
}

fn error_detail(error: &StoreError) -> Value {
    json!({
        "kind": error.kind(),
        "message": error.to_string(),
    })
}
