//! Todo list whose state survives a restart by replaying its event log.

use eventstash::action::{LOAD_EVENTS_DONE, load_events};
use eventstash::{
    Action, Dispatcher, EventSourcingMiddleware, EventStore, FileStorage, Middleware, Next,
    Pipeline, create_event_action,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tokio::sync::oneshot;

#[derive(Default, Clone, Debug, Serialize, Deserialize)]
struct TodoState {
    items: Vec<TodoItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TodoItem {
    id: String,
    title: String,
    completed: bool,
}

fn todo_reducer(mut state: TodoState, action: &Action) -> TodoState {
    let payload = action.get("payload").cloned().unwrap_or_default();
    let id = payload["id"].as_str().unwrap_or("").to_string();
    match action.action_type() {
        Some("todo/added") => state.items.push(TodoItem {
            id,
            title: payload["title"].as_str().unwrap_or("").to_string(),
            completed: false,
        }),
        Some("todo/completed") => {
            if let Some(item) = state.items.iter_mut().find(|i| i.id == id) {
                item.completed = true;
            }
        }
        Some("todo/deleted") => state.items.retain(|i| i.id != id),
        _ => {}
    }
    state
}

/// Signals once replay has finished.
struct ReplayDone(std::sync::Mutex<Option<oneshot::Sender<()>>>);

impl Middleware<TodoState> for ReplayDone {
    fn handle(&self, _: &Dispatcher<TodoState>, action: Action, next: Next<'_, TodoState>) {
        let done = action.action_type() == Some(LOAD_EVENTS_DONE);
        next.run(action);
        if done {
            if let Some(tx) = self.0.lock().ok().and_then(|mut tx| tx.take()) {
                let _ = tx.send(());
            }
        }
    }
}

type Session = (Pipeline<TodoState>, EventStore, oneshot::Receiver<()>);

fn open(dir: &Path) -> Result<Session, Box<dyn std::error::Error>> {
    let middleware = EventSourcingMiddleware::builder("todos")
        .storage(FileStorage::open(dir)?)
        .build()?;
    let store = middleware.store().clone();
    let (tx, rx) = oneshot::channel();
    let pipeline = Pipeline::builder(TodoState::default(), todo_reducer)
        .middleware(middleware)
        .middleware(ReplayDone(std::sync::Mutex::new(Some(tx))))
        .build();
    Ok((pipeline, store, rx))
}

fn print(state: &TodoState) {
    for item in &state.items {
        let check = if item.completed { "x" } else { " " };
        println!("  [{}] {}", check, item.title);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    // First session: add and complete some todos.
    {
        let (pipeline, store, _) = open(dir.path())?;
        for (id, title) in [("1", "buy milk"), ("2", "write docs")] {
            let action = Action::new("todo/added").with_payload(json!({"id": id, "title": title}));
            pipeline.dispatch(create_event_action(&action, None).into_action());
            println!("Added: {title}");
        }
        let done = Action::new("todo/completed").with_payload(json!({"id": "1"}));
        pipeline.dispatch(create_event_action(&done, None).into_action());
        println!("Completed: buy milk");

        // Appends run in the background; closing waits for them and frees
        // the directory lock for the next session.
        store.close().await;
    }

    // Second session: state starts empty and is rebuilt from the log.
    let (pipeline, _, replayed) = open(dir.path())?;
    pipeline.dispatch(load_events());
    replayed.await?;

    println!("\nTodos after restart:");
    print(&pipeline.get_state());
    Ok(())
}
