//! meshchat Core Library
//!
//! A small multi-node chat fabric: nodes accept client connections over a
//! length-prefixed message protocol, broadcast chat to their local clients,
//! and replicate it to sibling nodes over single-hop gossip.
//!
//! ## Overview
//!
//! ```text
//!  client ─┐                               ┌─ client
//!  client ─┼─▶ Node A ◀──── gossip ────▶ Node B ◀─┼─ client
//!  client ─┘   (9001 / 9003)      (9002 / 9004)   └─ client
//! ```
//!
//! - **Wire codec** ([`codec`]): `[u32 BE length][JSON payload]` frames
//! - **Message** ([`message`]): kind, username, text, timestamp, originating node
//! - **Registry** ([`registry`]) and **broadcast** ([`broadcast`]): the
//!   node's live sessions and fan-out to them
//! - **Sessions** ([`session`]): the per-connection join/serve/close loop
//! - **Gossip** ([`gossip`]): best-effort relay to directly configured peers
//! - **Node** ([`node`]): listeners, lifecycle, and the pieces above
//!
//! ## Quick Start
//!
//! ```ignore
//! use meshchat_core::{ChatClient, Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::from_config(NodeConfig::default()).await?;
//!
//!     let mut client = ChatClient::connect_to(node.client_addr(), "alice").await?;
//!     client.send_chat("hello, mesh").await?;
//!
//!     node.stop();
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod gossip;
pub mod logging;
pub mod message;
pub mod node;
pub mod registry;
pub mod session;

// Re-exports
pub use broadcast::{BroadcastReport, Broadcaster};
pub use client::ChatClient;
pub use codec::{FrameCodec, FrameError, Inbound};
pub use config::NodeConfig;
pub use error::{ChatError, ChatResult};
pub use gossip::GossipReplicator;
pub use logging::{ChatLog, ChatSink};
pub use message::{Message, MessageKind};
pub use node::Node;
pub use registry::{SessionHandle, SessionId, SessionRegistry};
pub use session::{Session, SessionState};
