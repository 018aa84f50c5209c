//! Single-hop gossip replication between sibling nodes
//!
//! ## Message Flow
//!
//! ```text
//! client ──chat──▶ Node A ──gossip──▶ Node B ──chat──▶ B's clients
//!                         └─gossip──▶ Node C ──chat──▶ C's clients
//! ```
//!
//! Outbound, every local chat line is sent to each configured peer's gossip
//! port over a short-lived connection: connect, send one `gossip` frame,
//! close. Nothing is retried or queued; a peer that is down misses the line.
//!
//! Inbound, each connection on the gossip port carries exactly one frame.
//! A `gossip` frame becomes a local `chat` broadcast; anything else is
//! ignored. Relayed lines are never relayed again, so a line reaches only
//! the directly configured peers of the node it was typed on. Configure
//! peers as a full mesh.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::broadcast::Broadcaster;
use crate::codec::{self, FrameCodec, Inbound};
use crate::error::{ChatError, ChatResult};
use crate::logging::ChatSink;
use crate::message::Message;

/// Timing and size limits for gossip connections.
#[derive(Debug, Clone, Copy)]
pub struct GossipSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_frame_len: usize,
}

/// Relays local chat to peers and applies chat relayed by peers.
pub struct GossipReplicator {
    peers: Vec<SocketAddr>,
    broadcaster: Broadcaster,
    chat_log: Arc<dyn ChatSink>,
    settings: GossipSettings,
}

impl GossipReplicator {
    pub fn new(
        peers: Vec<SocketAddr>,
        broadcaster: Broadcaster,
        chat_log: Arc<dyn ChatSink>,
        settings: GossipSettings,
    ) -> Self {
        Self {
            peers,
            broadcaster,
            chat_log,
            settings,
        }
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Fire-and-forget relay of a local chat line to every peer.
    ///
    /// Returns immediately; each peer is contacted from its own task. Only
    /// `chat` messages are relayed.
    pub fn replicate(&self, chat: &Message) {
        if !chat.is_chat() {
            return;
        }
        let gossip = chat.to_gossip().stamped(self.broadcaster.node_id());

        for &peer in &self.peers {
            let msg = gossip.clone();
            let settings = self.settings;
            tokio::spawn(async move {
                if let Err(e) = send_to_peer(peer, msg, settings).await {
                    debug!(%peer, error = %e, "Gossip dropped");
                }
            });
        }
    }

    /// Serve one inbound gossip connection.
    ///
    /// Returns the chat message that was broadcast locally, or `None` if the
    /// connection carried nothing usable.
    pub async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) -> Option<Message> {
        let mut reader = FramedRead::new(stream, FrameCodec::new(self.settings.max_frame_len));

        let received = match codec::next_message(&mut reader, Some(self.settings.read_timeout)).await {
            Ok(Inbound::Message(msg)) => msg,
            Ok(other) => {
                debug!(%addr, outcome = ?other, "Gossip connection carried no message");
                return None;
            }
            Err(e) => {
                debug!(%addr, error = %e, "Ignoring malformed gossip");
                return None;
            }
        };

        let Some(chat) = received.as_local_chat() else {
            debug!(%addr, kind = %received.kind, "Ignoring non-gossip message on gossip port");
            return None;
        };

        if let Err(e) = self.chat_log.append(&chat.username, &chat.text, chat.timestamp) {
            warn!(error = %e, "Failed to append relayed line to chat log");
        }

        let report = self.broadcaster.broadcast(chat.clone(), None);
        debug!(
            %addr,
            username = %chat.username,
            from_node = ?received.originating_node,
            delivered = report.delivered,
            "Applied gossip"
        );

        Some(chat.stamped(self.broadcaster.node_id()))
    }
}

/// Deliver one message to a peer's gossip port and close the connection.
pub async fn send_to_peer(peer: SocketAddr, msg: Message, settings: GossipSettings) -> ChatResult<()> {
    let stream = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(peer))
        .await
        .map_err(|_| ChatError::peer_unreachable(peer, "connect timed out"))?
        .map_err(|e| ChatError::peer_unreachable(peer, e))?;

    let mut writer = FramedWrite::new(stream, FrameCodec::new(settings.max_frame_len));
    tokio::time::timeout(settings.connect_timeout, writer.send(msg))
        .await
        .map_err(|_| ChatError::peer_unreachable(peer, "send timed out"))?
        .map_err(|e| ChatError::peer_unreachable(peer, e))?;

    let _ = writer.get_mut().shutdown().await;
    Ok(())
}
