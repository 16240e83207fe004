use crate::error::StoreError;
use crate::event::EventAction;
use crate::storage::Storage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Command {
    Append {
        event: EventAction,
        reply: Reply<()>,
    },
    LoadAll {
        reply: Reply<Vec<EventAction>>,
    },
    FindById {
        id: String,
        reply: Reply<Option<EventAction>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// The event log stored under one key of a [`Storage`] backend.
///
/// The whole log is a single JSON array of events. Every operation is sent to
/// a writer task that owns the key and handles commands one at a time in the
/// order they were issued, so concurrent appends never lose each other's
/// writes and a read sees every append enqueued before it.
///
/// Handles are cheap to clone; clones share the writer.
#[derive(Debug, Clone)]
pub struct EventStore {
    key: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
}

impl EventStore {
    /// Open the log under `key`, spawning its writer on the current Tokio runtime.
    ///
    /// Nothing is read until the first operation; a key that has never been
    /// written is an empty log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoRuntime`] when called outside a Tokio runtime.
    pub fn open(key: impl Into<String>, storage: Arc<dyn Storage>) -> Result<Self, StoreError> {
        let handle = tokio::runtime::Handle::try_current()?;
        let key: Arc<str> = Arc::from(key.into());
        let (commands, rx) = mpsc::unbounded_channel();

        let writer = LogWriter {
            key: Arc::clone(&key),
            storage,
        };
        handle.spawn(writer.run(rx));

        Ok(EventStore { key, commands })
    }

    /// The storage key this log lives under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append `event` to the end of the log.
    ///
    /// The append is queued before this returns; the returned future only
    /// reports its outcome. Dropping the future without awaiting it does not
    /// cancel the append.
    ///
    /// # Errors
    ///
    /// The future fails with [`StoreError::Storage`] if the backend read or
    /// write fails, [`StoreError::MalformedLog`] if the stored value cannot be
    /// parsed (the log is then left untouched), or [`StoreError::Closed`].
    pub fn append(
        &self,
        event: EventAction,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let queued = self.commands.send(Command::Append { event, reply }).is_ok();
        async move {
            if !queued {
                return Err(StoreError::Closed);
            }
            rx.await.unwrap_or(Err(StoreError::Closed))
        }
    }

    /// Return the full log in insertion order, or an empty vector if absent.
    pub async fn load_all(&self) -> Result<Vec<EventAction>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::LoadAll { reply })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Return the first event in stored order whose envelope id is `id`.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<EventAction>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::FindById {
                id: id.to_string(),
                reply,
            })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Wait until every operation queued before this call has finished.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush { reply })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// Stop the writer and release the backing storage.
    ///
    /// Operations queued before this call finish first. When it returns the
    /// writer has dropped its storage, so a [`FileStorage`](crate::FileStorage)
    /// directory lock is free to be taken again. Operations on remaining
    /// clones then fail with [`StoreError::Closed`].
    pub async fn close(self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Append { event, .. } => f.debug_tuple("Append").field(&event.id()).finish(),
            Command::LoadAll { .. } => f.write_str("LoadAll"),
            Command::FindById { id, .. } => f.debug_tuple("FindById").field(id).finish(),
            Command::Flush { .. } => f.write_str("Flush"),
            Command::Close { .. } => f.write_str("Close"),
        }
    }
}

struct LogWriter {
    key: Arc<str>,
    storage: Arc<dyn Storage>,
}

impl LogWriter {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut closed_by = None;
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append { event, reply } => {
                    let _ = reply.send(self.append(event).await);
                }
                Command::LoadAll { reply } => {
                    let _ = reply.send(self.load().await.map(Option::unwrap_or_default));
                }
                Command::FindById { id, reply } => {
                    let found = self.load().await.map(|events| {
                        events
                            .unwrap_or_default()
                            .into_iter()
                            .find(|event| event.id() == id)
                    });
                    let _ = reply.send(found);
                }
                Command::Flush { reply } => {
                    let _ = reply.send(());
                }
                Command::Close { reply } => {
                    closed_by = Some(reply);
                    break;
                }
            }
        }
        log::debug!("event store writer for '{}' stopped", self.key);

        // Storage must be gone before the closer is told.
        drop(rx);
        drop(self);
        if let Some(reply) = closed_by {
            let _ = reply.send(());
        }
    }

    async fn load(&self) -> Result<Option<Vec<EventAction>>, StoreError> {
        let Some(raw) = self.storage.get_item(&self.key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::MalformedLog {
                key: self.key.to_string(),
                source,
            })
    }

    async fn append(&self, event: EventAction) -> Result<(), StoreError> {
        let mut events = self.load().await?.unwrap_or_default();
        let id = event.id().to_string();
        events.push(event);

        let json = serde_json::to_string(&events).map_err(|source| StoreError::Serialize {
            key: self.key.to_string(),
            source,
        })?;
        self.storage.set_item(&self.key, &json).await?;

        log::debug!(
            "appended event {id} to '{}' ({} events)",
            self.key,
            events.len()
        );
        Ok(())
    }
}
