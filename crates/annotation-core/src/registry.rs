//! Connection registry: which connections belong to which document.
//!
//! The registry owns the sending half of every connection's bounded outbound
//! queue and nothing else. Unregistering a connection drops that sender, so
//! the connection's writer sees the queue close, and fires the connection's
//! [`CloseSignal`] so its reader stops too.
//!
//! Connections that have not named a document yet receive the changes of
//! every document until they bind to one.
//!
//! Membership is guarded by a `std::sync::RwLock` that is never held across an
//! await. Broadcasts iterate over a cloned snapshot, so a connection that
//! disconnects mid-broadcast costs at most one failed `try_deliver`.

use crate::envelope::Frame;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// Server-assigned identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Outbound queue is full")]
    Overflow,

    #[error("Connection is closed")]
    Closed,
}

/// Fired when the registry lets go of a connection.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal(Arc<Notify>);

impl CloseSignal {
    /// Wait until the connection is unregistered.
    ///
    /// A signal fired before anyone waits is kept for the next waiter.
    pub async fn closed(&self) {
        self.0.notified().await;
    }

    fn fire(&self) {
        self.0.notify_one();
    }
}

/// Sending side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Frame>,
    close: CloseSignal,
}

impl ConnectionHandle {
    /// Create a handle with a queue of `capacity` frames (minimum 1).
    ///
    /// The receiver belongs to the connection's writer.
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            outbound,
            close: CloseSignal::default(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting.
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Overflow,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal the connection's reader waits on. Holds no queue sender.
    pub fn close_signal(&self) -> CloseSignal {
        self.close.clone()
    }
}

struct Member {
    handle: ConnectionHandle,
    /// None until the connection names a document
    document_id: Option<String>,
}

#[derive(Default)]
struct Membership {
    members: HashMap<ConnectionId, Member>,
    /// document id -> connections bound to it
    documents: HashMap<String, Vec<ConnectionId>>,
}

impl Membership {
    fn detach(&mut self, id: ConnectionId, document_id: &str) {
        if let Some(ids) = self.documents.get_mut(document_id) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.documents.remove(document_id);
            }
        }
    }

    fn attach(&mut self, id: ConnectionId, document_id: &str) {
        self.documents
            .entry(document_id.to_string())
            .or_default()
            .push(id);
    }
}

/// Tracks connected clients per document.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Membership>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a document's broadcast group.
    ///
    /// Re-registering an existing connection moves it to `document_id`.
    pub fn register(&self, handle: ConnectionHandle, document_id: &str) {
        let id = handle.id();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(previous) = inner.members.remove(&id) {
            if let Some(doc) = previous.document_id {
                inner.detach(id, &doc);
            }
        }

        inner.attach(id, document_id);
        inner.members.insert(
            id,
            Member {
                handle,
                document_id: Some(document_id.to_string()),
            },
        );
        debug!("Registered {} to document {}", id, document_id);
    }

    /// Add a connection that has not joined a document yet.
    ///
    /// Until [`bind`](Self::bind) assigns a document it is a broadcast target
    /// for every document.
    pub fn admit(&self, handle: ConnectionHandle) {
        let id = handle.id();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = inner.members.remove(&id) {
            if let Some(doc) = previous.document_id {
                inner.detach(id, &doc);
            }
        }
        inner.members.insert(
            id,
            Member {
                handle,
                document_id: None,
            },
        );
        debug!("Admitted {} without a document", id);
    }

    /// Bind an admitted connection to a document.
    ///
    /// Returns false if the connection is unknown or already bound.
    pub fn bind(&self, id: ConnectionId, document_id: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(member) = inner.members.get_mut(&id) else {
            return false;
        };
        if member.document_id.is_some() {
            return false;
        }
        member.document_id = Some(document_id.to_string());
        inner.attach(id, document_id);
        debug!("Bound {} to document {}", id, document_id);
        true
    }

    /// Remove a connection. Returns whether it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.members.remove(&id) {
            Some(member) => {
                if let Some(doc) = member.document_id {
                    inner.detach(id, &doc);
                }
                member.handle.close.fire();
                debug!("Unregistered {}", id);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every connection on `document_id`, plus every unbound
    /// connection, except `excluding`.
    pub fn broadcast_targets(
        &self,
        document_id: &str,
        excluding: ConnectionId,
    ) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let bound = inner
            .documents
            .get(document_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.members.get(id));
        let unbound = inner.members.values().filter(|m| m.document_id.is_none());

        bound
            .chain(unbound)
            .filter(|member| member.handle.id() != excluding)
            .map(|member| member.handle.clone())
            .collect()
    }

    /// Document a connection is bound to, if any.
    pub fn document_of(&self, id: ConnectionId) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.members.get(&id).and_then(|m| m.document_id.clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.members.contains_key(&id)
    }

    /// Number of connections bound to a document.
    pub fn member_count(&self, document_id: &str) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.documents.get(document_id).map_or(0, Vec::len)
    }

    /// Number of connections, bound or not.
    pub fn connection_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.members.len()
    }
}
