//! The structured payload carried by every frame
//!
//! A [`Message`] is what travels between clients and nodes and between
//! sibling nodes. Its `kind` is a closed enumeration: unknown tags are
//! rejected when the payload is decoded, so a `Message` value is always
//! well-formed.
//!
//! ## JSON shape
//!
//! ```text
//! {"kind":"chat","username":"alice","text":"hi","timestamp":1705123456.789,"originating_node":9001}
//! ```
//!
//! Older peers send `type` instead of `kind` and `source_port` instead of
//! `originating_node`; both spellings are accepted on decode.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Username used when a message does not carry one.
pub const DEFAULT_USERNAME: &str = "anon";

/// Username stamped on messages the node itself produces (ping replies).
pub const SERVER_USERNAME: &str = "server";

/// Body of the direct reply to a `ping`.
pub const PONG_TEXT: &str = "pong";

/// What a message means to the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A chat line from a user
    Chat,
    /// Informational notice produced by a node
    System,
    /// A chat line relayed from a sibling node
    Gossip,
    /// Liveness check; answered directly, never broadcast
    Ping,
    /// A user joined this node
    Join,
    /// A user left this node
    Leave,
}

impl MessageKind {
    /// Wire tag for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::System => "system",
            MessageKind::Gossip => "gossip",
            MessageKind::Ping => "ping",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logical protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind
    #[serde(alias = "type")]
    pub kind: MessageKind,
    /// Sender display name; absent or `null` becomes [`DEFAULT_USERNAME`]
    #[serde(default = "default_username", deserialize_with = "username_or_default")]
    pub username: String,
    /// Message body (may be empty for non-chat kinds)
    #[serde(default)]
    pub text: String,
    /// Seconds since the Unix epoch
    #[serde(default = "now_timestamp")]
    pub timestamp: f64,
    /// Client port of the node that broadcast or gossiped this message
    #[serde(default, alias = "source_port")]
    pub originating_node: Option<u16>,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn username_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_username))
}

/// Current time as fractional seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(kind: MessageKind, username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            username: username.into(),
            text: text.into(),
            timestamp: now_timestamp(),
            originating_node: None,
        }
    }

    pub fn chat(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Chat, username, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageKind::System, SERVER_USERNAME, text)
    }

    /// The handshake a client sends first, naming itself.
    pub fn join(username: &str) -> Self {
        Self::new(MessageKind::Join, username, "")
    }

    /// A client's goodbye. Nodes ignore it; hanging up is what ends a session.
    pub fn leave(username: &str) -> Self {
        Self::new(MessageKind::Leave, username, "")
    }

    /// System announcement that `username` joined, e.g. `"alice joined"`.
    pub fn joined(username: &str) -> Self {
        Self::new(MessageKind::System, username, format!("{} joined", username))
    }

    /// System announcement that `username` left, e.g. `"alice left"`.
    pub fn left(username: &str) -> Self {
        Self::new(MessageKind::System, username, format!("{} left", username))
    }

    /// A ping from a client.
    pub fn ping(username: impl Into<String>) -> Self {
        Self::new(MessageKind::Ping, username, "")
    }

    /// The node's direct answer to a ping.
    pub fn pong() -> Self {
        Self::new(MessageKind::Ping, SERVER_USERNAME, PONG_TEXT)
    }

    /// Relay form of a chat line, sent to sibling nodes.
    ///
    /// Keeps the original username, text and timestamp.
    pub fn to_gossip(&self) -> Self {
        Self {
            kind: MessageKind::Gossip,
            username: self.username.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp,
            originating_node: self.originating_node,
        }
    }

    /// Local chat form of a relayed line. Returns `None` for non-gossip kinds.
    pub fn as_local_chat(&self) -> Option<Self> {
        if self.kind != MessageKind::Gossip {
            return None;
        }
        Some(Self {
            kind: MessageKind::Chat,
            username: self.username.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp,
            originating_node: None,
        })
    }

    /// Set the originating node, replacing whatever the sender claimed.
    pub fn stamped(mut self, node: u16) -> Self {
        self.originating_node = Some(node);
        self
    }

    pub fn is_chat(&self) -> bool {
        self.kind == MessageKind::Chat
    }

    pub fn is_gossip(&self) -> bool {
        self.kind == MessageKind::Gossip
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }

    pub fn is_ping(&self) -> bool {
        self.kind == MessageKind::Ping
    }

    /// Timestamp as a local date-time, falling back to now if out of range.
    pub fn local_time(&self) -> DateTime<Local> {
        let millis = (self.timestamp * 1000.0) as i64;
        Local
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Local::now)
    }

    /// Wall-clock time of the message as `HH:MM:SS`.
    pub fn clock_time(&self) -> String {
        self.local_time().format("%H:%M:%S").to_string()
    }
}
