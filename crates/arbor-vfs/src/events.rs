//! Change notifications.
//!
//! Every committed mutation publishes exactly one [`FsEvent`]; every failed
//! operation publishes one `Failed` event carrying the error kind. Events go
//! out on a broadcast channel after the tree lock has been released, so a
//! slow subscriber never holds up the filesystem: it lags and skips instead.
//!
//! Subscribers filter by path prefix (a configuration watcher subscribes to
//! `/etc`) and optionally by event kind.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ErrorKind, VfsError};
use crate::path::is_under;

/// What happened.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum FsEventKind {
    Created,
    Deleted,
    Written,
    Copied,
    Moved,
    Mounted,
    Unmounted,
    /// Mode or ownership changed.
    AttributesChanged,
    /// Tree replaced from a snapshot.
    Loaded,
    /// Tree written to a snapshot store.
    Saved,
    /// The operation failed; see `error`.
    Failed,
}

/// A change or diagnostic notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: String,
    pub message: String,
    pub timestamp: SystemTime,
    /// Set for `Failed` events.
    pub error: Option<ErrorKind>,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
            timestamp: SystemTime::now(),
            error: None,
        }
    }

    /// Diagnostic event for a failed operation on `path`.
    pub fn failure(path: impl Into<String>, err: &VfsError) -> Self {
        let path = path.into();
        Self {
            kind: FsEventKind::Failed,
            path: err.path().map(str::to_string).unwrap_or(path),
            message: err.to_string(),
            timestamp: SystemTime::now(),
            error: Some(err.kind()),
        }
    }
}

/// Broadcast bus for filesystem events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<FsEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: FsEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events at or beneath `prefix`.
    pub fn subscribe(&self, prefix: &str) -> Subscription {
        Subscription {
            prefix: prefix.to_string(),
            kinds: None,
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to selected kinds of events at or beneath `prefix`.
    pub fn subscribe_kinds(
        &self,
        prefix: &str,
        kinds: impl IntoIterator<Item = FsEventKind>,
    ) -> Subscription {
        Subscription {
            prefix: prefix.to_string(),
            kinds: Some(kinds.into_iter().collect()),
            rx: self.tx.subscribe(),
        }
    }
}

/// A filtered view of the event stream.
pub struct Subscription {
    prefix: String,
    kinds: Option<Vec<FsEventKind>>,
    rx: broadcast::Receiver<FsEvent>,
}

impl Subscription {
    /// Get the subscription prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn matches(&self, event: &FsEvent) -> bool {
        is_under(&event.path, &self.prefix)
            && self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&event.kind))
    }

    /// Receive the next matching event, waiting if necessary.
    ///
    /// Returns None if the bus is gone.
    pub async fn recv(&mut self) -> Option<FsEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(prefix = %self.prefix, lagged = n, "event subscription lagged behind");
                }
            }
        }
    }

    /// Receive the next matching event without blocking.
    ///
    /// Returns None if no matching event is available.
    pub fn try_recv(&mut self) -> Option<FsEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(prefix = %self.prefix, lagged = n, "event subscription lagged behind");
                }
            }
        }
    }

    /// Everything currently queued that matches.
    pub fn drain(&mut self) -> Vec<FsEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
