//! Node integration tests
//!
//! Real nodes on loopback ephemeral ports, driven by protocol clients.

mod common;

use std::time::Duration;

use common::*;
use meshchat_core::{Inbound, Message, MessageKind};
use tokio::net::TcpStream;

// ============================================================================
// Local broadcast
// ============================================================================

#[tokio::test]
async fn test_chat_reaches_every_other_session_exactly_once() {
    let (node, chat_log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    let mut bob = join(&node, "bob").await;
    let mut carol = join(&node, "carol").await;
    for client in [&mut alice, &mut bob, &mut carol] {
        drain(client).await;
    }

    alice.send_chat("hi").await.unwrap();

    for client in [&mut bob, &mut carol] {
        let got = drain(client).await;
        let chats: Vec<_> = got.iter().filter(|m| m.kind == MessageKind::Chat).collect();
        assert_eq!(chats.len(), 1, "exactly one copy expected, got {:?}", got);
        assert_eq!(chats[0].text, "hi");
        assert_eq!(chats[0].username, "alice");
        assert_eq!(chats[0].originating_node, Some(node.node_id()));
    }

    // The sender is excluded from its own broadcast.
    assert!(drain(&mut alice).await.iter().all(|m| m.kind != MessageKind::Chat));
    assert_eq!(chat_log.lines().len(), 1);
    assert!(chat_log.lines()[0].ends_with("alice: hi"));
}

#[tokio::test]
async fn test_join_is_announced_to_everyone() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    drain(&mut alice).await;

    let mut bob = join(&node, "bob").await;

    let seen_by_alice = recv_until(&mut alice, is_joined).await;
    assert_eq!(seen_by_alice.username, "bob");
    assert_eq!(seen_by_alice.text, "bob joined");

    // The joiner sees its own announcement too.
    let seen_by_bob = recv_until(&mut bob, is_joined).await;
    assert_eq!(seen_by_bob.username, "bob");
    assert_eq!(node.usernames(), vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_chat_uses_handshake_username() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    let mut bob = join(&node, "bob").await;
    drain(&mut bob).await;

    alice.send(Message::chat("mallory", "not really mallory")).await.unwrap();

    let got = recv_chat(&mut bob, "not really mallory").await;
    assert_eq!(got.username, "alice");
}

#[tokio::test]
async fn test_missing_username_uses_default() {
    let (node, _log) = start_node(test_config()).await;
    let mut raw = TcpStream::connect(node.client_addr()).await.unwrap();
    write_raw_frame(&mut raw, br#"{"kind":"join"}"#).await;
    wait_for_sessions(&node, 1).await;
    assert_eq!(node.usernames(), vec!["anon"]);
}

#[tokio::test]
async fn test_null_username_uses_default() {
    let (node, _log) = start_node(test_config()).await;
    let mut raw = TcpStream::connect(node.client_addr()).await.unwrap();
    write_raw_frame(&mut raw, br#"{"kind":"join","username":null}"#).await;
    wait_for_sessions(&node, 1).await;
    assert_eq!(node.usernames(), vec!["anon"]);
}

#[tokio::test]
async fn test_presence_announcements_are_system_messages() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    drain(&mut alice).await;

    let bob = join(&node, "bob").await;
    let joined = recv_until(&mut alice, |m| m.text == "bob joined").await;
    assert_eq!(joined.kind, MessageKind::System);
    assert_eq!(joined.username, "bob");

    drop(bob);
    let left = recv_until(&mut alice, |m| m.text == "bob left").await;
    assert_eq!(left.kind, MessageKind::System);
    assert_eq!(left.username, "bob");
}

#[tokio::test]
async fn test_many_messages_arrive_in_order() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    let mut bob = join(&node, "bob").await;
    drain(&mut bob).await;

    for i in 0..50 {
        alice.send_chat(&format!("line {}", i)).await.unwrap();
    }

    for i in 0..50 {
        let got = recv_until(&mut bob, |m| m.kind == MessageKind::Chat).await;
        assert_eq!(got.text, format!("line {}", i));
    }
}

// ============================================================================
// Ping
// ============================================================================

#[tokio::test]
async fn test_ping_gets_direct_reply_without_broadcast() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    let mut bob = join(&node, "bob").await;
    drain(&mut alice).await;
    drain(&mut bob).await;

    let reply = alice.ping(EXPECT).await.unwrap();
    assert_eq!(reply.kind, MessageKind::Ping);
    assert_eq!(reply.text, "pong");
    assert_eq!(reply.originating_node, Some(node.node_id()));

    assert!(drain(&mut bob).await.is_empty());
}

#[tokio::test]
async fn test_other_kinds_are_ignored() {
    let (node, chat_log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    let mut bob = join(&node, "bob").await;
    drain(&mut bob).await;

    alice.send(Message::system("pretend announcement")).await.unwrap();
    alice.send(Message::leave("alice")).await.unwrap();

    assert!(drain(&mut bob).await.is_empty());
    assert_eq!(node.session_count(), 2);
    assert!(chat_log.lines().is_empty());
}

// ============================================================================
// Session teardown
// ============================================================================

#[tokio::test]
async fn test_disconnect_announces_leave_once() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    let bob = join(&node, "bob").await;
    drain(&mut alice).await;

    drop(bob);
    wait_for_sessions(&node, 1).await;

    let got = drain(&mut alice).await;
    let leaves: Vec<_> = got.iter().filter(|m| is_left(m)).collect();
    assert_eq!(leaves.len(), 1, "got {:?}", got);
    assert_eq!(leaves[0].text, "bob left");
    assert_eq!(node.usernames(), vec!["alice"]);
}

#[tokio::test]
async fn test_handshake_failure_is_never_registered_or_announced() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    drain(&mut alice).await;

    // Connect and hang up without a join.
    drop(TcpStream::connect(node.client_addr()).await.unwrap());

    // Connect, send half a frame, hang up.
    let mut partial = TcpStream::connect(node.client_addr()).await.unwrap();
    {
        use tokio::io::AsyncWriteExt;
        partial.write_all(&10u32.to_be_bytes()).await.unwrap();
        partial.write_all(b"{\"").await.unwrap();
    }
    drop(partial);

    assert!(drain(&mut alice).await.is_empty());
    assert_eq!(node.session_count(), 1);
}

#[tokio::test]
async fn test_malformed_frame_drops_session() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;

    let mut raw = TcpStream::connect(node.client_addr()).await.unwrap();
    write_raw_frame(&mut raw, br#"{"kind":"join","username":"eve"}"#).await;
    wait_for_sessions(&node, 2).await;
    drain(&mut alice).await;

    write_raw_frame(&mut raw, b"{ this is not json").await;
    wait_for_sessions(&node, 1).await;

    let leave = recv_until(&mut alice, is_left).await;
    assert_eq!(leave.text, "eve left");
}

#[tokio::test]
async fn test_unknown_kind_drops_session() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;

    let mut raw = TcpStream::connect(node.client_addr()).await.unwrap();
    write_raw_frame(&mut raw, br#"{"kind":"join","username":"eve"}"#).await;
    wait_for_sessions(&node, 2).await;
    drain(&mut alice).await;

    write_raw_frame(&mut raw, br#"{"kind":"shout","text":"HELLO"}"#).await;
    wait_for_sessions(&node, 1).await;

    let got = drain(&mut alice).await;
    assert!(got.iter().all(|m| m.text != "HELLO"));
    assert_eq!(got.iter().filter(|m| is_left(m)).count(), 1);
}

#[tokio::test]
async fn test_stop_closes_registered_sessions() {
    let (node, _log) = start_node(test_config()).await;
    let mut alice = join(&node, "alice").await;
    drain(&mut alice).await;

    node.stop();
    assert_eq!(node.session_count(), 0);

    let deadline = tokio::time::Instant::now() + EXPECT;
    loop {
        match alice.recv(Some(Duration::from_millis(100))).await {
            Ok(Inbound::Closed) | Err(_) => break,
            Ok(_) => assert!(
                tokio::time::Instant::now() < deadline,
                "connection still open after stop"
            ),
        }
    }
    assert!(!node.is_running());
}

// ============================================================================
// Gossip
// ============================================================================

#[tokio::test]
async fn test_chat_reaches_peer_node() {
    let (node_b, log_b) = start_node(test_config()).await;
    let (node_a, log_a) =
        start_node(test_config().with_peer(node_b.gossip_addr().to_string())).await;

    let mut alice = join(&node_a, "alice").await;
    let mut bob = join(&node_b, "bob").await;
    drain(&mut bob).await;

    alice.send_chat("hi").await.unwrap();

    let got = recv_chat(&mut bob, "hi").await;
    assert_eq!(got.username, "alice");
    assert_eq!(got.kind, MessageKind::Chat);
    assert_eq!(got.originating_node, Some(node_b.node_id()));

    assert_eq!(log_a.lines().len(), 1);
    let deadline = tokio::time::Instant::now() + EXPECT;
    while log_b.lines().is_empty() {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(log_b.lines()[0].ends_with("alice: hi"));

    // B has no peers, so nothing comes back to A.
    assert!(drain(&mut alice).await.iter().all(|m| m.kind != MessageKind::Chat));
}

#[tokio::test]
async fn test_gossip_is_single_hop() {
    let (a_gossip, b_gossip, c_gossip) = (free_port(), free_port(), free_port());
    let peer = |port: u16| format!("127.0.0.1:{}", port);

    let (node_a, _) = start_node(test_config().with_gossip_port(a_gossip).with_peer(peer(b_gossip))).await;
    let (node_b, _) = start_node(
        test_config()
            .with_gossip_port(b_gossip)
            .with_peers([peer(a_gossip), peer(c_gossip)]),
    )
    .await;
    let (node_c, _) = start_node(test_config().with_gossip_port(c_gossip).with_peer(peer(b_gossip))).await;

    let mut alice = join(&node_a, "alice").await;
    let mut bob = join(&node_b, "bob").await;
    let mut carol = join(&node_c, "carol").await;
    drain(&mut bob).await;
    drain(&mut carol).await;

    alice.send_chat("from A").await.unwrap();

    let got = recv_chat(&mut bob, "from A").await;
    assert_eq!(got.username, "alice");
    assert!(drain(&mut carol).await.iter().all(|m| m.text != "from A"));

    // B sits in the middle and reaches both ends.
    bob.send_chat("from B").await.unwrap();
    recv_chat(&mut alice, "from B").await;
    recv_chat(&mut carol, "from B").await;
}

#[tokio::test]
async fn test_down_peer_does_not_affect_local_delivery() {
    let dead_peer = format!("127.0.0.1:{}", free_port());
    let (node, _log) = start_node(test_config().with_peer(dead_peer)).await;

    let mut alice = join(&node, "alice").await;
    let mut bob = join(&node, "bob").await;
    drain(&mut bob).await;

    alice.send_chat("still here").await.unwrap();
    recv_chat(&mut bob, "still here").await;
    assert_eq!(node.session_count(), 2);
}

#[tokio::test]
async fn test_gossip_port_ignores_non_gossip() {
    let (node, chat_log) = start_node(test_config()).await;
    let mut bob = join(&node, "bob").await;
    drain(&mut bob).await;

    let mut raw = TcpStream::connect(node.gossip_addr()).await.unwrap();
    write_raw_frame(&mut raw, br#"{"kind":"chat","username":"mallory","text":"sneaky"}"#).await;
    drop(raw);

    let mut raw = TcpStream::connect(node.gossip_addr()).await.unwrap();
    write_raw_frame(&mut raw, b"garbage").await;
    drop(raw);

    assert!(drain(&mut bob).await.is_empty());
    assert!(chat_log.lines().is_empty());
    assert_eq!(node.session_count(), 1);
}

#[tokio::test]
async fn test_gossip_port_accepts_legacy_field_names() {
    let (node, _log) = start_node(test_config()).await;
    let mut bob = join(&node, "bob").await;
    drain(&mut bob).await;

    let mut raw = TcpStream::connect(node.gossip_addr()).await.unwrap();
    write_raw_frame(
        &mut raw,
        br#"{"type":"gossip","username":"alice","text":"legacy","source_port":9001}"#,
    )
    .await;

    let got = recv_chat(&mut bob, "legacy").await;
    assert_eq!(got.username, "alice");
}
