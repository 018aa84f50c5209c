//! Chat node lifecycle
//!
//! A [`Node`] owns two listeners, a session registry and a static peer
//! list:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Node                                                           │
//! │  ├── client listener ─▶ one task per client (SessionHandler)    │
//! │  ├── gossip listener ─▶ one task per peer connection            │
//! │  ├── SessionRegistry (shared by handlers and broadcasts)        │
//! │  ├── GossipReplicator (static peer gossip addresses)            │
//! │  └── shutdown: CancellationToken                                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry belongs to the node, not the process, so any number of
//! nodes can run side by side in one process.
//!
//! ## Usage
//!
//! ```ignore
//! let config = NodeConfig::default().with_peer("10.0.0.2:9003");
//! let node = Node::from_config(config).await?;
//! tokio::signal::ctrl_c().await?;
//! node.stop();
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::NodeConfig;
use crate::error::ChatResult;
use crate::gossip::{GossipReplicator, GossipSettings};
use crate::logging::{ChatLog, ChatSink, NullSink};
use crate::registry::SessionRegistry;
use crate::session::{SessionHandler, SessionSettings};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A running chat node.
///
/// Dropping the node stops it.
pub struct Node {
    client_addr: SocketAddr,
    gossip_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    replicator: Arc<GossipReplicator>,
    shutdown: CancellationToken,
    accept_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Start a node, opening the chat transcript named in the config.
    pub async fn from_config(config: NodeConfig) -> ChatResult<Self> {
        let chat_log: Arc<dyn ChatSink> = match &config.chat_log {
            Some(path) => Arc::new(ChatLog::open(path)?),
            None => Arc::new(NullSink),
        };
        Self::start(config, chat_log).await
    }

    /// Bind both listeners and start accepting connections.
    pub async fn start(config: NodeConfig, chat_log: Arc<dyn ChatSink>) -> ChatResult<Self> {
        config.validate()?;

        let client_listener = TcpListener::bind(config.client_bind_addr()).await?;
        let gossip_listener = TcpListener::bind(config.gossip_bind_addr()).await?;
        let client_addr = client_listener.local_addr()?;
        let gossip_addr = gossip_listener.local_addr()?;
        let peers = config.resolve_peers(gossip_addr).await?;

        let node_id = client_addr.port();
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), node_id);
        let replicator = Arc::new(GossipReplicator::new(
            peers,
            broadcaster.clone(),
            chat_log.clone(),
            GossipSettings {
                connect_timeout: config.peer_connect_timeout,
                read_timeout: config.gossip_read_timeout,
                max_frame_len: config.max_frame_len,
            },
        ));

        let shutdown = CancellationToken::new();
        let handler = SessionHandler::new(
            broadcaster,
            replicator.clone(),
            chat_log,
            SessionSettings {
                poll_interval: config.poll_interval,
                send_timeout: config.send_timeout,
                outbound_queue: config.outbound_queue,
                max_frame_len: config.max_frame_len,
            },
            shutdown.clone(),
        );

        let accept_tasks = vec![
            tokio::spawn(client_accept_loop(client_listener, handler, shutdown.clone())),
            tokio::spawn(gossip_accept_loop(
                gossip_listener,
                replicator.clone(),
                shutdown.clone(),
            )),
        ];

        info!(
            node = node_id,
            %client_addr,
            %gossip_addr,
            peers = ?replicator.peers(),
            "Node started"
        );

        Ok(Self {
            client_addr,
            gossip_addr,
            registry,
            replicator,
            shutdown,
            accept_tasks: Mutex::new(accept_tasks),
        })
    }

    /// Stop accepting, close both listeners and every session.
    ///
    /// Returns without waiting for connection tasks to finish; they observe
    /// the closed sockets and exit on their own.
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        for task in self.accept_tasks.lock().drain(..) {
            task.abort();
        }
        let closed = self.registry.close_all();
        info!(node = self.node_id(), sessions = closed.len(), "Node stopped");
    }

    /// Resolve once the node has been asked to stop.
    pub async fn wait(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Identity stamped on broadcast and gossiped messages (the client port).
    pub fn node_id(&self) -> u16 {
        self.client_addr.port()
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.gossip_addr
    }

    pub fn peers(&self) -> &[SocketAddr] {
        self.replicator.peers()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.registry.usernames()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn client_accept_loop(
    listener: TcpListener,
    handler: SessionHandler,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!(%addr, "Accepted client connection");
                let _ = stream.set_nodelay(true);
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(stream, addr).await {
                        debug!(%addr, error = %e, "Client connection ended with error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Client accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("Client listener closed");
}

async fn gossip_accept_loop(
    listener: TcpListener,
    replicator: Arc<GossipReplicator>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let replicator = replicator.clone();
                tokio::spawn(async move {
                    replicator.handle_inbound(stream, addr).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Gossip accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("Gossip listener closed");
}
