//! Client session handling
//!
//! Each accepted client connection is served by one task running
//! [`SessionHandler::handle`], which walks the session state machine:
//!
//! ```text
//!   accept
//!     │
//!     ▼
//! ┌──────────────┐ first message ┌────────┐ EOF / bad frame / ┌────────┐
//! │ AwaitingJoin │──────────────▶│ Active │──shutdown/pruned─▶│ Closed │
//! └──────────────┘               └────────┘                   └────────┘
//!     │ read fails                                                ▲
//!     └───────────────────────────(never registered)──────────────┘
//! ```
//!
//! - **AwaitingJoin**: the first message, whatever its kind, names the
//!   user. Nothing is registered or announced until it arrives.
//! - **Active**: `chat` is logged, broadcast to everyone else and relayed
//!   to peers; `ping` is answered directly; other kinds are ignored.
//! - **Closed**: the session is unregistered and, if this task was the one
//!   that removed it, a system `"<name> left"` is broadcast.
//!
//! Writes go through a separate writer task fed by the session's bounded
//! outbound queue, so a broadcast never waits on this client's socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::codec::{self, Inbound, MessageReader, MessageWriter};
use crate::error::{ChatError, ChatResult};
use crate::gossip::GossipReplicator;
use crate::logging::ChatSink;
use crate::message::{Message, MessageKind, DEFAULT_USERNAME};
use crate::registry::{SessionHandle, SessionId};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingJoin,
    Active,
    Closed,
}

/// Server-side state of one client connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    addr: SocketAddr,
    username: Option<String>,
    state: SessionState,
    last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: SessionId::new(),
            addr,
            username: None,
            state: SessionState::AwaitingJoin,
            last_activity: Utc::now(),
        }
    }

    /// Complete the handshake. The username can only be set once.
    pub fn identify(&mut self, username: &str) -> ChatResult<()> {
        if self.state != SessionState::AwaitingJoin {
            return Err(ChatError::InvalidOperation(format!(
                "session {} already identified",
                self.id
            )));
        }
        let username = if username.trim().is_empty() {
            DEFAULT_USERNAME
        } else {
            username
        };
        self.username = Some(username.to_string());
        self.state = SessionState::Active;
        self.touch();
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The handshake username, or the default sentinel before the handshake.
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }
}

/// Per-session timing and buffering limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Bounded wait of each read while active
    pub poll_interval: Duration,
    /// Bounded wait of each socket write
    pub send_timeout: Duration,
    /// Outbound queue capacity
    pub outbound_queue: usize,
    pub max_frame_len: usize,
}

/// Everything a client connection task needs from its node.
#[derive(Clone)]
pub struct SessionHandler {
    broadcaster: Broadcaster,
    replicator: Arc<GossipReplicator>,
    chat_log: Arc<dyn ChatSink>,
    settings: SessionSettings,
    shutdown: CancellationToken,
}

impl SessionHandler {
    pub fn new(
        broadcaster: Broadcaster,
        replicator: Arc<GossipReplicator>,
        chat_log: Arc<dyn ChatSink>,
        settings: SessionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broadcaster,
            replicator,
            chat_log,
            settings,
            shutdown,
        }
    }

    /// Serve one client connection until it closes.
    ///
    /// Returns `Ok` for an orderly end (client hung up or node stopped) and
    /// an error describing why the connection was dropped otherwise.
    pub async fn handle(&self, stream: TcpStream, addr: SocketAddr) -> ChatResult<()> {
        let (mut reader, writer) = codec::framed(stream, self.settings.max_frame_len);
        let mut session = Session::new(addr);

        let join = match self.await_join(&mut reader).await {
            Ok(join) => join,
            Err(e) => {
                session.close();
                debug!(%addr, error = %e, "Connection closed before join");
                return Err(e);
            }
        };
        session.identify(&join.username)?;

        let cancel = self.shutdown.child_token();
        let (outbound, queue) = mpsc::channel(self.settings.outbound_queue);
        tokio::spawn(write_loop(
            writer,
            queue,
            self.settings.send_timeout,
            cancel.clone(),
        ));

        let registry = self.broadcaster.registry();
        registry.register(SessionHandle::new(
            session.id(),
            session.username(),
            addr,
            outbound.clone(),
            cancel.clone(),
        ));
        info!(%addr, username = %session.username(), "Session joined");
        self.broadcaster.broadcast(Message::joined(session.username()), None);

        let result = self.serve(&mut session, &mut reader, &outbound, &cancel).await;

        session.close();
        cancel.cancel();
        if let Some(gone) = registry.unregister(&session.id()) {
            self.broadcaster.broadcast(Message::left(&gone.username), None);
        }
        match &result {
            Ok(()) => info!(%addr, username = %session.username(), "Session left"),
            Err(e) => info!(%addr, username = %session.username(), error = %e, "Session dropped"),
        }
        result
    }

    async fn await_join(&self, reader: &mut MessageReader) -> ChatResult<Message> {
        let next = tokio::select! {
            _ = self.shutdown.cancelled() => {
                return Err(ChatError::HandshakeIncomplete("node shutting down".into()));
            }
            next = codec::next_message(reader, None) => next,
        };

        match next {
            Ok(Inbound::Message(msg)) => Ok(msg),
            Ok(Inbound::Closed) | Ok(Inbound::TimedOut) => Err(ChatError::HandshakeIncomplete(
                "connection closed before join".into(),
            )),
            Err(e) => Err(ChatError::HandshakeIncomplete(e.to_string())),
        }
    }

    async fn serve(
        &self,
        session: &mut Session,
        reader: &mut MessageReader,
        outbound: &mpsc::Sender<Message>,
        cancel: &CancellationToken,
    ) -> ChatResult<()> {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = codec::next_message(reader, Some(self.settings.poll_interval)) => next,
            };

            match next {
                Ok(Inbound::TimedOut) => continue,
                Ok(Inbound::Closed) => return Ok(()),
                Ok(Inbound::Message(msg)) => {
                    session.touch();
                    self.dispatch(session, msg, outbound)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn dispatch(
        &self,
        session: &Session,
        msg: Message,
        outbound: &mpsc::Sender<Message>,
    ) -> ChatResult<()> {
        match msg.kind {
            MessageKind::Chat => {
                let chat = Message::chat(session.username(), msg.text);
                if let Err(e) = self.chat_log.append(&chat.username, &chat.text, chat.timestamp) {
                    warn!(error = %e, "Failed to append to chat log");
                }
                let report = self.broadcaster.broadcast(chat.clone(), Some(session.id()));
                debug!(username = %chat.username, delivered = report.delivered, "Chat broadcast");
                self.replicator.replicate(&chat);
                Ok(())
            }
            MessageKind::Ping => {
                let pong = Message::pong().stamped(self.broadcaster.node_id());
                outbound
                    .try_send(pong)
                    .map_err(|e| ChatError::ConnectionLost(format!("ping reply failed: {}", e)))
            }
            other => {
                debug!(username = %session.username(), kind = %other, "Ignoring message");
                Ok(())
            }
        }
    }
}

/// Drain a session's outbound queue onto its socket.
///
/// Stops on cancellation, a failed or slow write, or when every sender is
/// gone; on exit it cancels the session so the reading side stops too.
async fn write_loop(
    mut writer: MessageWriter,
    mut queue: mpsc::Receiver<Message>,
    send_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = queue.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match tokio::time::timeout(send_timeout, writer.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "Write to client failed");
                break;
            }
            Err(_) => {
                debug!(timeout_ms = send_timeout.as_millis() as u64, "Write to client timed out");
                break;
            }
        }
    }

    cancel.cancel();
    queue.close();
    let _ = tokio::time::timeout(send_timeout, writer.get_mut().shutdown()).await;
}
