//! Length-prefixed wire codec
//!
//! Frames a TCP byte stream into [`Message`]s. Every frame is a 4-byte
//! big-endian payload length followed by that many bytes of JSON:
//!
//! ```text
//! +----------------+------------------------------+
//! | length (u32 BE)| JSON payload (length bytes)  |
//! +----------------+------------------------------+
//! ```
//!
//! The same framing is used on the client port and on the gossip port.
//! [`FrameCodec`] plugs into `tokio_util`'s `FramedRead`/`FramedWrite`, which
//! take care of accumulating partial reads.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::message::Message;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest payload accepted unless configured otherwise (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Codec error: framing, payload or I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds maximum ({max} bytes)")]
    FrameTooLarge { len: usize, max: usize },
    #[error("connection closed mid-frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec for length-prefixed JSON messages.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

fn peek_len(src: &[u8]) -> usize {
    u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let len = peek_len(src);
        if len > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        Ok(Some(serde_json::from_slice(&payload)?))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(buf)? {
            return Ok(Some(msg));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // Stream ended with a partial frame buffered.
        let (expected, received) = if buf.len() < HEADER_LEN {
            (HEADER_LEN, buf.len())
        } else {
            (peek_len(buf), buf.len() - HEADER_LEN)
        };
        buf.clear();
        Err(FrameError::Truncated { expected, received })
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Encode a single message into a complete frame.
pub fn encode(msg: &Message) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::new();
    FrameCodec::default().encode(msg.clone(), &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one complete frame.
///
/// Fails with [`FrameError::Truncated`] if `frame` holds less than a full frame.
pub fn decode(frame: &[u8]) -> Result<Message, FrameError> {
    let mut buf = BytesMut::from(frame);
    FrameCodec::default()
        .decode_eof(&mut buf)?
        .ok_or(FrameError::Truncated {
            expected: HEADER_LEN,
            received: 0,
        })
}

/// Read half of a framed connection.
pub type MessageReader<R = OwnedReadHalf> = FramedRead<R, FrameCodec>;

/// Write half of a framed connection.
pub type MessageWriter<W = OwnedWriteHalf> = FramedWrite<W, FrameCodec>;

/// Split a TCP stream into framed read and write halves.
pub fn framed(stream: TcpStream, max_frame_len: usize) -> (MessageReader, MessageWriter) {
    let (read, write) = stream.into_split();
    let codec = FrameCodec::new(max_frame_len);
    (FramedRead::new(read, codec), FramedWrite::new(write, codec))
}

/// Outcome of waiting for the next message on a connection.
#[derive(Debug)]
pub enum Inbound {
    /// A complete, valid message
    Message(Message),
    /// The peer closed the connection cleanly between frames
    Closed,
    /// No complete message arrived within the wait; try again
    TimedOut,
}

/// Wait for the next message, optionally bounded by `wait`.
///
/// A timeout leaves any partially received frame buffered in the reader,
/// so the next call resumes where this one stopped.
pub async fn next_message<S>(stream: &mut S, wait: Option<Duration>) -> Result<Inbound, FrameError>
where
    S: Stream<Item = Result<Message, FrameError>> + Unpin,
{
    let next = match wait {
        Some(wait) => match tokio::time::timeout(wait, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Ok(Inbound::TimedOut),
        },
        None => stream.next().await,
    };

    match next {
        Some(Ok(msg)) => Ok(Inbound::Message(msg)),
        Some(Err(e)) => Err(e),
        None => Ok(Inbound::Closed),
    }
}
