//! Error types for meshchat nodes and clients

use std::net::SocketAddr;

use thiserror::Error;

use crate::codec::FrameError;

/// Main error type for meshchat operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Malformed length prefix or payload; the connection is treated as dead
    #[error("Framing error: {0}")]
    Framing(#[from] FrameError),

    /// Peer closed the connection or an I/O error occurred mid-session
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Gossip send to a configured peer failed
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    /// First read on a new client connection failed before a session existed
    #[error("Handshake incomplete: {0}")]
    HandshakeIncomplete(String),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No configured server accepted the connection
    #[error("No server reachable (tried {0})")]
    NoServerReachable(String),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Build a `PeerUnreachable` from a peer address and any displayable cause.
    pub fn peer_unreachable(peer: SocketAddr, reason: impl std::fmt::Display) -> Self {
        ChatError::PeerUnreachable {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;
