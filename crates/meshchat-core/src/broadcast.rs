//! Broadcast engine
//!
//! Delivers a message to every session in a node's registry, optionally
//! skipping the sender. Delivery is a non-blocking enqueue onto each
//! session's outbound queue; the session's writer task does the socket
//! write under a bounded timeout. A session whose queue is full or whose
//! writer has stopped is pruned after the pass, and its departure is
//! announced to everyone else.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use crate::message::Message;
use crate::registry::{SessionId, SessionRegistry};

/// Outcome of one [`Broadcaster::broadcast`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the original message was queued for
    pub delivered: usize,
    /// Usernames of sessions removed because delivery failed
    pub pruned: Vec<String>,
}

/// Fan-out of messages to the local sessions of one node.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    node_id: u16,
}

impl Broadcaster {
    pub fn new(registry: Arc<SessionRegistry>, node_id: u16) -> Self {
        Self { registry, node_id }
    }

    /// Identity stamped on every outgoing message (the client port).
    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Deliver `message` to every registered session except `exclude`.
    ///
    /// Sessions that fail delivery are unregistered (at most once, even if
    /// their handler is tearing down concurrently) and a system
    /// `"<name> left"` is broadcast for each in turn. The registry lock is never held during delivery.
    pub fn broadcast(&self, message: Message, exclude: Option<SessionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut pending = VecDeque::from([(message, exclude)]);
        let mut first = true;

        while let Some((message, exclude)) = pending.pop_front() {
            let message = message.stamped(self.node_id);
            let mut delivered = 0;
            let mut failed = Vec::new();

            for session in self.registry.snapshot() {
                if Some(session.id) == exclude {
                    continue;
                }
                match session.deliver(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        debug!(session = %session.id, username = %session.username, error = %e, "Delivery failed");
                        failed.push(session.id);
                    }
                }
            }

            if first {
                report.delivered = delivered;
                first = false;
            }

            for id in failed {
                if let Some(gone) = self.registry.unregister(&id) {
                    gone.close();
                    info!(username = %gone.username, addr = %gone.addr, "Dropped unresponsive session");
                    pending.push_back((Message::left(&gone.username), None));
                    report.pruned.push(gone.username);
                }
            }
        }

        report
    }
}
