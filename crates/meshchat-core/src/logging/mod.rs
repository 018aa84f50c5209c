//! Chat transcript and node event logging.
//!
//! Two kinds of log live here:
//!
//! - the **chat transcript** ([`ChatLog`]): one human-readable line per chat
//!   message, appended by every connection task of a node;
//! - the **node event log** ([`JsonlLayer`]): a `tracing` layer writing one
//!   JSON object per event to a per-node file.
//!
//! ```ignore
//! use meshchat_core::logging::JsonlLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let layer = JsonlLayer::new("./logs", "node-9001")?;
//! tracing_subscriber::registry()
//!     .with(layer)
//!     .with(tracing_subscriber::fmt::layer())
//!     .init();
//! ```
//!
//! ```bash
//! # Everything node 9001 dropped
//! jq 'select(.node == "node-9001" and .level == "debug")' logs/*.jsonl
//! ```

pub mod chat_log;
pub mod entry;
pub mod layer;

pub use chat_log::{format_line, ChatLog, ChatSink, MemoryChatLog, NullSink};
pub use entry::NodeLogEntry;
pub use layer::JsonlLayer;
