#![allow(dead_code)]

use async_trait::async_trait;
use eventstash::{Action, Dispatcher, EventAction, Middleware, Next, Storage, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const KEY: &str = "test-events";

/// An action with a hand-built envelope.
pub fn dummy_event(id: &str, action_type: &str) -> EventAction {
    let action = Action::from(json!({
        "type": action_type,
        "payload": {"key": "value"},
        "meta": {"eventSourcing": {"id": id, "timestamp": 1000, "version": 1}}
    }));
    EventAction::try_from(action).unwrap()
}

pub fn ids(events: &[EventAction]) -> Vec<String> {
    events.iter().map(|e| e.id().to_string()).collect()
}

/// Storage whose reads and/or writes can be made to fail, counting writes.
#[derive(Default)]
pub struct FlakyStorage {
    items: Mutex<std::collections::HashMap<String, String>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_writes() -> Self {
        let storage = Self::default();
        storage.fail_writes.store(true, Ordering::SeqCst);
        storage
    }

    pub fn failing_reads() -> Self {
        let storage = Self::default();
        storage.fail_reads.store(true, Ordering::SeqCst);
        storage
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.lock().unwrap().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        self.items
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("read refused".to_string()));
        }
        Ok(self.items.lock().unwrap().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        // Yield between read and write so racing appends would interleave
        // if the store did not serialize them.
        tokio::task::yield_now().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.items
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Forwards every action it sees to a channel, then passes it on.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Action>,
}

impl Recorder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Recorder { tx }, rx)
    }
}

impl<S: Default> Middleware<S> for Recorder {
    fn handle(&self, _dispatcher: &Dispatcher<S>, action: Action, next: Next<'_, S>) {
        let _ = self.tx.send(action.clone());
        next.run(action);
    }
}

/// Receive actions until one of type `action_type` arrives, returning everything seen.
pub async fn recv_until(rx: &mut mpsc::UnboundedReceiver<Action>, action_type: &str) -> Vec<Action> {
    let mut seen = Vec::new();
    let wait = async {
        while let Some(action) = rx.recv().await {
            let done = action.action_type() == Some(action_type);
            seen.push(action);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {action_type}"));
    seen
}

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TodoState {
    pub items: Vec<TodoItem>,
    pub filter: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    pub completed: bool,
}

pub fn todo_reducer(mut state: TodoState, action: &Action) -> TodoState {
    let payload = action.get("payload").cloned().unwrap_or_default();
    match action.action_type() {
        Some("todo/added") => {
            state.items.push(TodoItem {
                id: payload["id"].as_str().unwrap_or("").to_string(),
                title: payload["title"].as_str().unwrap_or("").to_string(),
                completed: false,
            });
        }
        Some("todo/completed") => {
            let id = payload["id"].as_str().unwrap_or("");
            if let Some(item) = state.items.iter_mut().find(|i| i.id == id) {
                item.completed = true;
            }
        }
        Some("todo/filter_changed") => {
            state.filter = payload["filter"].as_str().unwrap_or("all").to_string();
        }
        _ => {}
    }
    state
}

pub fn added(id: &str, title: &str) -> Action {
    Action::new("todo/added").with_payload(json!({"id": id, "title": title}))
}

pub fn counter_reducer(state: u64, _action: &Action) -> u64 {
    state + 1
}
