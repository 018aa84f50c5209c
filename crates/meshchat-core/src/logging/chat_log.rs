//! Durable chat transcript
//!
//! Every chat line a node handles, whether typed by a local client or
//! relayed by a sibling, is appended to a flat text file:
//!
//! ```text
//! 14:30:45 alice: hi
//! 14:30:52 bob: hello alice
//! ```
//!
//! Many connection tasks append concurrently. Each line is formatted in
//! full and written with a single `write_all` under a mutex onto a file
//! opened in append mode, so lines never interleave.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::message::Message;

/// Destination for chat lines.
pub trait ChatSink: Send + Sync {
    /// Append one line for a chat message.
    fn append(&self, username: &str, text: &str, timestamp: f64) -> std::io::Result<()>;
}

/// Format a transcript line (without trailing newline).
pub fn format_line(username: &str, text: &str, timestamp: f64) -> String {
    let clock = Message {
        timestamp,
        ..Message::chat(username, text)
    }
    .clock_time();
    format!("{} {}: {}", clock, username, text)
}

/// Append-only transcript file.
pub struct ChatLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ChatLog {
    /// Open (or create) the transcript, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every line of a transcript.
    pub fn read_lines(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
        let content = fs::read_to_string(path)?;
        Ok(content.lines().map(str::to_string).collect())
    }
}

impl ChatSink for ChatLog {
    fn append(&self, username: &str, text: &str, timestamp: f64) -> std::io::Result<()> {
        let mut line = format_line(username, text, timestamp);
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

impl std::fmt::Debug for ChatLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatLog").field("path", &self.path).finish()
    }
}

/// Sink that discards everything (transcript disabled).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ChatSink for NullSink {
    fn append(&self, _username: &str, _text: &str, _timestamp: f64) -> std::io::Result<()> {
        Ok(())
    }
}

/// In-memory transcript, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryChatLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl ChatSink for MemoryChatLog {
    fn append(&self, username: &str, text: &str, timestamp: f64) -> std::io::Result<()> {
        self.lines.lock().push(format_line(username, text, timestamp));
        Ok(())
    }
}
