//! Protocol client
//!
//! A [`ChatClient`] is an ordinary client of a node's client port: it
//! connects, sends the join handshake, then exchanges framed messages.
//! When given several servers it tries them in order and keeps the first
//! one that accepts, which is how the CLI falls back between nodes.

use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::codec::{self, Inbound, MessageReader, MessageWriter, DEFAULT_MAX_FRAME_LEN};
use crate::error::{ChatError, ChatResult};
use crate::message::Message;

/// A connected, joined client session.
pub struct ChatClient {
    reader: MessageReader,
    writer: MessageWriter,
    server: SocketAddr,
    username: String,
}

impl ChatClient {
    /// Connect to the first reachable server and join as `username`.
    pub async fn connect<S: AsRef<str>>(
        servers: &[S],
        username: &str,
        connect_timeout: Duration,
    ) -> ChatResult<Self> {
        let mut tried = Vec::with_capacity(servers.len());
        for server in servers {
            let server = server.as_ref();
            match tokio::time::timeout(connect_timeout, TcpStream::connect(server)).await {
                Ok(Ok(stream)) => return Self::join(stream, username).await,
                Ok(Err(e)) => debug!(server, error = %e, "Server unreachable"),
                Err(_) => debug!(server, "Connect timed out"),
            }
            tried.push(server.to_string());
        }
        Err(ChatError::NoServerReachable(tried.join(", ")))
    }

    /// Connect to one server and join as `username`.
    pub async fn connect_to(addr: SocketAddr, username: &str) -> ChatResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::join(stream, username).await
    }

    async fn join(stream: TcpStream, username: &str) -> ChatResult<Self> {
        let server = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = codec::framed(stream, DEFAULT_MAX_FRAME_LEN);
        let mut client = Self {
            reader,
            writer,
            server,
            username: username.to_string(),
        };
        client.send(Message::join(username)).await?;
        debug!(%server, username, "Joined");
        Ok(client)
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Send any message as-is.
    pub async fn send(&mut self, msg: Message) -> ChatResult<()> {
        self.writer
            .send(msg)
            .await
            .map_err(|e| ChatError::ConnectionLost(e.to_string()))
    }

    pub async fn send_chat(&mut self, text: &str) -> ChatResult<()> {
        let msg = Message::chat(self.username.clone(), text);
        self.send(msg).await
    }

    /// Wait for the next message from the server.
    pub async fn recv(&mut self, wait: Option<Duration>) -> ChatResult<Inbound> {
        Ok(codec::next_message(&mut self.reader, wait).await?)
    }

    /// Wait for the next message, treating a timeout or close as an error.
    pub async fn expect_message(&mut self, wait: Duration) -> ChatResult<Message> {
        match self.recv(Some(wait)).await? {
            Inbound::Message(msg) => Ok(msg),
            Inbound::Closed => Err(ChatError::ConnectionLost("server closed connection".into())),
            Inbound::TimedOut => Err(ChatError::ConnectionLost(format!(
                "no message within {}ms",
                wait.as_millis()
            ))),
        }
    }

    /// Ping the server and wait for its direct reply.
    ///
    /// Other traffic arriving meanwhile is discarded.
    pub async fn ping(&mut self, wait: Duration) -> ChatResult<Message> {
        let msg = Message::ping(self.username.clone());
        self.send(msg).await?;
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = self.expect_message(remaining).await?;
            if msg.is_ping() {
                return Ok(msg);
            }
        }
    }
}
