use crate::action::Action;
use crate::error::NotAnEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the top-level metadata field on an action.
pub const META_FIELD: &str = "meta";

/// Name of the envelope field nested under [`META_FIELD`].
pub const ENVELOPE_FIELD: &str = "eventSourcing";

/// Version stamped on events when the producer does not give one.
pub const DEFAULT_VERSION: u32 = 1;

/// The event-sourcing envelope stored under `meta.eventSourcing`.
///
/// `timestamp` and `version` are kept as raw JSON numbers: any numeric value
/// qualifies an action as an event, not only the integers the builder writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Envelope {
    /// Opaque unique identifier, used for point lookups.
    pub id: String,

    /// Creation instant in milliseconds since the Unix epoch.
    pub timestamp: Number,

    /// Schema version of the event payload.
    pub version: Number,
}

impl Envelope {
    /// Create an envelope with integer timestamp and version.
    pub fn new(id: impl Into<String>, timestamp: u64, version: u32) -> Self {
        Envelope {
            id: id.into(),
            timestamp: Number::from(timestamp),
            version: Number::from(version),
        }
    }

    /// Read the envelope off an action, if it has the exact event shape.
    ///
    /// Requires `meta` to be an object holding an `eventSourcing` object with
    /// a string `id` and numeric `timestamp` and `version`. Extra fields are
    /// ignored.
    pub fn extract(action: &Action) -> Option<Envelope> {
        let envelope = action
            .as_object()?
            .get(META_FIELD)?
            .as_object()?
            .get(ENVELOPE_FIELD)?
            .as_object()?;

        let id = envelope.get("id")?.as_str()?;
        let timestamp = number_field(envelope, "timestamp")?;
        let version = number_field(envelope, "version")?;

        Some(Envelope {
            id: id.to_string(),
            timestamp: timestamp.clone(),
            version: version.clone(),
        })
    }

    /// The timestamp as whole milliseconds, if it is a non-negative integer.
    pub fn timestamp_millis(&self) -> Option<u64> {
        self.timestamp.as_u64()
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        map.insert("timestamp".to_string(), Value::Number(self.timestamp.clone()));
        map.insert("version".to_string(), Value::Number(self.version.clone()));
        Value::Object(map)
    }
}

fn number_field<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a Number> {
    match map.get(name)? {
        Value::Number(n) => Some(n),
        _ => None,
    }
}

/// Returns `true` if `action` carries a well-formed event-sourcing envelope.
///
/// This is a purely structural check: an action qualifies whether or not it
/// was produced by [`create_event_action`].
///
/// # Examples
///
/// ```
/// use eventstash::{Action, create_event_action, is_event};
/// use serde_json::json;
///
/// let plain = Action::new("filter/changed");
/// assert!(!is_event(&plain));
///
/// let event = create_event_action(&Action::new("todo/added"), None);
/// assert!(is_event(event.as_action()));
///
/// // Hand-built envelopes count too.
/// let manual = Action::from(json!({
///     "type": "X",
///     "meta": {"eventSourcing": {"id": "a1", "timestamp": 1000, "version": 1}}
/// }));
/// assert!(is_event(&manual));
/// ```
pub fn is_event(action: &Action) -> bool {
    Envelope::extract(action).is_some()
}

/// An action known to carry a valid envelope.
///
/// Only obtainable through [`EnvelopeBuilder`] or [`TryFrom<Action>`], both of
/// which go through the same check as [`is_event`]. Serializes as the
/// underlying action, and deserializing re-validates the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Action", into = "Action")]
pub struct EventAction {
    action: Action,
    envelope: Envelope,
}

impl EventAction {
    /// The envelope's event identifier.
    pub fn id(&self) -> &str {
        &self.envelope.id
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// The full action, envelope included.
    pub fn as_action(&self) -> &Action {
        &self.action
    }

    pub fn into_action(self) -> Action {
        self.action
    }
}

impl TryFrom<Action> for EventAction {
    type Error = NotAnEvent;

    fn try_from(action: Action) -> Result<Self, Self::Error> {
        match Envelope::extract(&action) {
            Some(envelope) => Ok(EventAction { action, envelope }),
            None => Err(NotAnEvent(action)),
        }
    }
}

impl From<EventAction> for Action {
    fn from(event: EventAction) -> Self {
        event.action
    }
}

/// Source of opaque unique event identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Generates random (v4) UUID strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Stamps actions with a fresh event-sourcing envelope.
///
/// The identifier source is injected; [`EnvelopeBuilder::default`] uses
/// [`UuidGenerator`].
#[derive(Clone)]
pub struct EnvelopeBuilder {
    ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for EnvelopeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeBuilder").finish_non_exhaustive()
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        EnvelopeBuilder::new(Arc::new(UuidGenerator))
    }
}

impl EnvelopeBuilder {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        EnvelopeBuilder { ids }
    }

    /// Return a copy of `action` with `meta.eventSourcing` set.
    ///
    /// The envelope gets a new id, the current time in milliseconds and
    /// `version` (or [`DEFAULT_VERSION`]). Other `meta` fields are kept; a
    /// `meta` that is not an object is replaced. An existing envelope is
    /// overwritten.
    pub fn build(&self, action: &Action, version: Option<u32>) -> EventAction {
        let envelope = Envelope::new(
            self.ids.generate(),
            now_millis(),
            version.unwrap_or(DEFAULT_VERSION),
        );

        let mut meta = match action.get(META_FIELD) {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };
        meta.insert(ENVELOPE_FIELD.to_string(), envelope.to_value());

        let action = action.clone().with_field(META_FIELD, Value::Object(meta));
        EventAction { action, envelope }
    }
}

/// Stamp `action` with a new envelope using the default [`EnvelopeBuilder`].
///
/// # Examples
///
/// ```
/// use eventstash::{Action, create_event_action};
/// use serde_json::json;
///
/// let action = Action::new("todo/added").with_field("meta", json!({"source": "ui"}));
/// let event = create_event_action(&action, Some(2));
///
/// assert_eq!(event.envelope().version.as_u64(), Some(2));
/// assert_eq!(event.as_action().get("meta").unwrap()["source"], "ui");
/// // The input is untouched.
/// assert!(action.get("meta").unwrap().get("eventSourcing").is_none());
/// ```
pub fn create_event_action(action: &Action, version: Option<u32>) -> EventAction {
    EnvelopeBuilder::default().build(action, version)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
