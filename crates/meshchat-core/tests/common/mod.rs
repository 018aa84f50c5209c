//! Shared helpers for node integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use meshchat_core::logging::MemoryChatLog;
use meshchat_core::{ChatClient, Inbound, Message, MessageKind, Node, NodeConfig};

/// How long to wait for something that should happen.
pub const EXPECT: Duration = Duration::from_secs(3);

/// How long to wait before concluding something did not happen.
pub const QUIET: Duration = Duration::from_millis(300);

/// Loopback config with a short poll so shutdown is observed quickly.
pub fn test_config() -> NodeConfig {
    NodeConfig::local().with_poll_interval(Duration::from_millis(50))
}

/// Start a node with an in-memory transcript.
pub async fn start_node(config: NodeConfig) -> (Node, Arc<MemoryChatLog>) {
    let chat_log = Arc::new(MemoryChatLog::new());
    let node = Node::start(config, chat_log.clone())
        .await
        .expect("node should start");
    (node, chat_log)
}

/// Wait until the node has exactly `count` registered sessions.
pub async fn wait_for_sessions(node: &Node, count: usize) {
    let deadline = tokio::time::Instant::now() + EXPECT;
    while node.session_count() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} sessions, have {}",
            count,
            node.session_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Join a node and wait until the node has registered the session.
pub async fn join(node: &Node, username: &str) -> ChatClient {
    let before = node.session_count();
    let client = ChatClient::connect_to(node.client_addr(), username)
        .await
        .expect("client should connect");
    wait_for_sessions(node, before + 1).await;
    client
}

/// Read messages until one matches, failing after [`EXPECT`].
pub async fn recv_until<F>(client: &mut ChatClient, mut pred: F) -> Message
where
    F: FnMut(&Message) -> bool,
{
    let deadline = tokio::time::Instant::now() + EXPECT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = client
            .expect_message(remaining)
            .await
            .expect("expected a matching message");
        if pred(&msg) {
            return msg;
        }
    }
}

/// Wait for a chat line with the given text.
pub async fn recv_chat(client: &mut ChatClient, text: &str) -> Message {
    recv_until(client, |m| m.kind == MessageKind::Chat && m.text == text).await
}

/// A system announcement that someone joined.
pub fn is_joined(msg: &Message) -> bool {
    msg.kind == MessageKind::System && msg.text.ends_with(" joined")
}

/// A system announcement that someone left.
pub fn is_left(msg: &Message) -> bool {
    msg.kind == MessageKind::System && msg.text.ends_with(" left")
}

/// Collect everything that arrives within [`QUIET`].
pub async fn drain(client: &mut ChatClient) -> Vec<Message> {
    let mut out = Vec::new();
    loop {
        match client.recv(Some(QUIET)).await {
            Ok(Inbound::Message(msg)) => out.push(msg),
            _ => return out,
        }
    }
}

/// A port that was free a moment ago.
///
/// Used where nodes must know each other's gossip ports before starting.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("should find a free port")
}

/// Write one raw frame carrying `payload`.
pub async fn write_raw_frame(stream: &mut tokio::net::TcpStream, payload: &[u8]) {
    use tokio::io::AsyncWriteExt;
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}
