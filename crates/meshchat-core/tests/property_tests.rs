//! Property-based tests for the wire codec and message conversions
//!
//! Uses proptest to check framing invariants over arbitrary content.

use bytes::BytesMut;
use meshchat_core::codec::{self, FrameCodec, HEADER_LEN};
use meshchat_core::{Message, MessageKind};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// Strategy Generators
// ============================================================================

fn kind_strategy() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Chat),
        Just(MessageKind::System),
        Just(MessageKind::Gossip),
        Just(MessageKind::Ping),
        Just(MessageKind::Join),
        Just(MessageKind::Leave),
    ]
}

/// Arbitrary text, including control characters and non-ASCII
fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("(?s).{0,300}").expect("valid regex")
}

fn username_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_ -]{1,32}").expect("valid regex")
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (
        kind_strategy(),
        username_strategy(),
        text_strategy(),
        prop::option::of(any::<u16>()),
    )
        .prop_map(|(kind, username, text, node)| {
            let msg = Message::new(kind, username, text);
            match node {
                Some(node) => msg.stamped(node),
                None => msg,
            }
        })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Decoding an encoded frame preserves every field
    #[test]
    fn frame_preserves_message(msg in message_strategy()) {
        let frame = codec::encode(&msg).unwrap();
        let decoded = codec::decode(&frame).unwrap();
        prop_assert_eq!(decoded.kind, msg.kind);
        prop_assert_eq!(&decoded.username, &msg.username);
        prop_assert_eq!(&decoded.text, &msg.text);
        prop_assert_eq!(decoded.originating_node, msg.originating_node);
        prop_assert!((decoded.timestamp - msg.timestamp).abs() < 1e-3);
    }

    /// The header always states the exact payload length
    #[test]
    fn header_matches_payload_len(msg in message_strategy()) {
        let frame = codec::encode(&msg).unwrap();
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(declared, frame.len() - HEADER_LEN);
    }

    /// Any strict prefix of a frame yields no message and leaves the buffer intact
    #[test]
    fn prefix_never_decodes(msg in message_strategy(), cut in 0usize..1000) {
        let frame = codec::encode(&msg).unwrap();
        let cut = cut % frame.len();
        let mut buf = BytesMut::from(&frame[..cut]);
        let mut codec = FrameCodec::default();
        prop_assert!(codec.decode(&mut buf).unwrap().is_none());
        prop_assert_eq!(buf.len(), cut);
    }

    /// Back-to-back frames split at any point decode to the same sequence
    #[test]
    fn stream_split_anywhere(
        msgs in prop::collection::vec(message_strategy(), 1..8),
        split in 0usize..10_000,
    ) {
        let mut codec = FrameCodec::default();
        let mut wire = BytesMut::new();
        for msg in &msgs {
            codec.encode(msg.clone(), &mut wire).unwrap();
        }
        let split = split % (wire.len() + 1);
        let tail = wire.split_off(split);

        let mut buf = wire;
        let mut out = Vec::new();
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            out.push(msg);
        }
        buf.extend_from_slice(&tail);
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            out.push(msg);
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(out.len(), msgs.len());
        for (got, want) in out.iter().zip(&msgs) {
            prop_assert_eq!(&got.text, &want.text);
            prop_assert_eq!(got.kind, want.kind);
        }
    }

    /// Chat converts to gossip and back without changing author or text
    #[test]
    fn gossip_conversion_keeps_content(username in username_strategy(), text in text_strategy()) {
        let chat = Message::chat(username.clone(), text.clone()).stamped(9001);
        let gossip = chat.to_gossip();
        prop_assert_eq!(gossip.kind, MessageKind::Gossip);

        let local = gossip.as_local_chat().unwrap();
        prop_assert_eq!(local.kind, MessageKind::Chat);
        prop_assert_eq!(local.username, username);
        prop_assert_eq!(local.text, text);
        prop_assert_eq!(local.timestamp, chat.timestamp);
    }

    /// Only gossip converts into a local chat
    #[test]
    fn non_gossip_never_converts(kind in kind_strategy(), text in text_strategy()) {
        let msg = Message::new(kind, "alice", text);
        prop_assert_eq!(msg.as_local_chat().is_some(), kind == MessageKind::Gossip);
    }
}
