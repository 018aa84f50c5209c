//! Session registry
//!
//! The registry maps every connected, handshake-completed session of one
//! node to a [`SessionHandle`]. It is the only state shared between
//! connection tasks. Every insert and remove happens under one mutex;
//! readers take a snapshot and release the lock before doing any I/O, so a
//! slow client never holds up a join.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  SessionRegistry                                             │
//! │  └── sessions: Mutex<HashMap<SessionId, SessionHandle>>      │
//! │        ├── username / addr / connected_at                    │
//! │        ├── outbound: mpsc::Sender<Message>  → writer task    │
//! │        └── cancel: CancellationToken        → handler task   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ulid::Ulid;

use crate::message::Message;

/// Unique identifier for a session
///
/// Uses ULID so ids sort by connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Ulid);

impl SessionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Why a message could not be handed to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session's outbound queue is full: the client is not keeping up
    #[error("outbound queue full")]
    Full,
    /// The session's writer has stopped: the connection is gone
    #[error("session closed")]
    Closed,
}

/// Registry entry for one live session.
///
/// Cloning a handle is cheap; clones share the outbound queue and the
/// cancellation token.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub username: String,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        username: impl Into<String>,
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            addr,
            connected_at: Utc::now(),
            outbound,
            cancel,
        }
    }

    /// Queue a message for this session without waiting.
    pub fn deliver(&self, message: Message) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Force the session's connection closed.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

/// Thread-safe map of the sessions connected to one node.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. Replaces any previous entry with the same id.
    pub fn register(&self, handle: SessionHandle) {
        debug!(session = %handle.id, username = %handle.username, addr = %handle.addr, "Registering session");
        self.sessions.lock().insert(handle.id, handle);
    }

    /// Remove a session, returning it if it was present.
    ///
    /// Removing an absent session is a no-op, so concurrent removers can
    /// tell which of them actually removed it.
    pub fn unregister(&self, id: &SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.lock().remove(id);
        if let Some(ref handle) = removed {
            debug!(session = %id, username = %handle.username, "Unregistered session");
        }
        removed
    }

    /// Consistent copy of all registered sessions.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Usernames of all registered sessions, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .lock()
            .values()
            .map(|s| s.username.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove every session and close its connection.
    pub fn close_all(&self) -> Vec<SessionHandle> {
        let drained: Vec<SessionHandle> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        drained
    }
}
