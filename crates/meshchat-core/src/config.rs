//! Node configuration
//!
//! A [`NodeConfig`] describes one chat node: where it listens for clients,
//! where it listens for sibling gossip, which peers it relays to, and the
//! timing knobs of its connection handling. Peers are static for the
//! lifetime of a node.
//!
//! Configs can be written as JSON:
//!
//! ```text
//! {
//!   "host": "0.0.0.0",
//!   "client_port": 9001,
//!   "gossip_port": 9003,
//!   "peers": ["10.0.0.2:9003", "10.0.0.3:9003"],
//!   "chat_log": "logs/message_log.txt"
//! }
//! ```
//!
//! Missing fields take their defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::error::{ChatError, ChatResult};

/// Default client-facing port
pub const DEFAULT_CLIENT_PORT: u16 = 9001;

/// Default gossip port
pub const DEFAULT_GOSSIP_PORT: u16 = 9003;

/// Default location of the chat transcript
pub const DEFAULT_CHAT_LOG: &str = "logs/message_log.txt";

/// Configuration for a single chat node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interface both listeners bind to
    pub host: String,
    /// Client-facing port (0 picks an ephemeral port)
    pub client_port: u16,
    /// Gossip port (0 picks an ephemeral port)
    pub gossip_port: u16,
    /// Gossip addresses of sibling nodes, as `host:port`
    pub peers: Vec<String>,
    /// Chat transcript path; `None` disables the transcript
    pub chat_log: Option<PathBuf>,
    /// Largest accepted frame payload in bytes
    pub max_frame_len: usize,
    /// How often an idle session re-checks for shutdown
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Upper bound on writing one message to one client
    #[serde(with = "millis")]
    pub send_timeout: Duration,
    /// Upper bound on connecting to a peer's gossip port
    #[serde(with = "millis")]
    pub peer_connect_timeout: Duration,
    /// Upper bound on reading the single message of a gossip connection
    #[serde(with = "millis")]
    pub gossip_read_timeout: Duration,
    /// Messages buffered per session before it counts as unresponsive
    pub outbound_queue: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            client_port: DEFAULT_CLIENT_PORT,
            gossip_port: DEFAULT_GOSSIP_PORT,
            peers: Vec::new(),
            chat_log: Some(PathBuf::from(DEFAULT_CHAT_LOG)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            poll_interval: Duration::from_millis(500),
            send_timeout: Duration::from_secs(2),
            peer_connect_timeout: Duration::from_secs(2),
            gossip_read_timeout: Duration::from_secs(5),
            outbound_queue: 64,
        }
    }
}

impl NodeConfig {
    /// Loopback node on ephemeral ports with no transcript; handy for tests.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            client_port: 0,
            gossip_port: 0,
            chat_log: None,
            ..Self::default()
        }
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Parse a config from JSON text.
    pub fn from_json(raw: &str) -> ChatResult<Self> {
        serde_json::from_str(raw).map_err(|e| ChatError::Config(format!("invalid config: {}", e)))
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> ChatResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_client_port(mut self, port: u16) -> Self {
        self.client_port = port;
        self
    }

    pub fn with_gossip_port(mut self, port: u16) -> Self {
        self.gossip_port = port;
        self
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peers.push(peer.into());
        self
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers.extend(peers.into_iter().map(Into::into));
        self
    }

    pub fn with_chat_log(mut self, path: Option<PathBuf>) -> Self {
        self.chat_log = path;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> ChatResult<()> {
        if self.client_port != 0 && self.client_port == self.gossip_port {
            return Err(ChatError::Config(format!(
                "client port and gossip port must differ (both {})",
                self.client_port
            )));
        }
        if self.max_frame_len == 0 {
            return Err(ChatError::Config("max_frame_len must be positive".into()));
        }
        if self.outbound_queue == 0 {
            return Err(ChatError::Config("outbound_queue must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ChatError::Config("poll_interval must be positive".into()));
        }
        Ok(())
    }

    /// Address the client listener binds to.
    pub fn client_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.client_port)
    }

    /// Address the gossip listener binds to.
    pub fn gossip_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.gossip_port)
    }

    /// Resolve the peer list, dropping `own_gossip` (a node never peers with itself).
    ///
    /// Every entry must resolve; the first resolved address is used.
    pub async fn resolve_peers(&self, own_gossip: SocketAddr) -> ChatResult<Vec<SocketAddr>> {
        let mut resolved = Vec::with_capacity(self.peers.len());
        for peer in &self.peers {
            let addr = tokio::net::lookup_host(peer.as_str())
                .await
                .map_err(|e| ChatError::Config(format!("invalid peer '{}': {}", peer, e)))?
                .next()
                .ok_or_else(|| ChatError::Config(format!("peer '{}' did not resolve", peer)))?;
            if is_self(addr, own_gossip) {
                continue;
            }
            if !resolved.contains(&addr) {
                resolved.push(addr);
            }
        }
        Ok(resolved)
    }
}

/// Whether `peer` names our own gossip listener.
///
/// A wildcard bind only matches local addresses; a remote host on the same
/// port is a different node.
fn is_self(peer: SocketAddr, own: SocketAddr) -> bool {
    if peer.port() != own.port() {
        return false;
    }
    let local = |ip: std::net::IpAddr| ip.is_loopback() || ip.is_unspecified();
    if own.ip().is_unspecified() {
        return local(peer.ip());
    }
    peer.ip() == own.ip() || (peer.ip().is_loopback() && own.ip().is_loopback())
}

/// Durations are written as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
