//! In-memory capture of the bot's console output.
use std::{collections::VecDeque, fmt};

use serde::Serialize;
use strum_macros::AsRefStr;

use crate::constants::STDERR_LINE_PREFIX;

/// Origin of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogStream {
    /// Standard output of the bot.
    Stdout,
    /// Standard error of the bot.
    Stderr,
}

/// A single captured line. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// Stream the line was read from.
    pub stream: LogStream,
    /// Decoded text without the trailing newline.
    pub text: String,
}

impl LogLine {
    /// Creates a line tagged with its origin.
    pub fn new(stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stream {
            LogStream::Stdout => write!(f, "{}", self.text),
            LogStream::Stderr => write!(f, "{STDERR_LINE_PREFIX}{}", self.text),
        }
    }
}

/// Append-only line store with oldest-first retention.
///
/// The buffer does no locking of its own: it lives inside the supervisor's
/// shared state and is only touched while that state's mutex is held.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    retention: usize,
}

impl LogBuffer {
    /// Creates a buffer that keeps at most `retention` lines (at least one).
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            lines: VecDeque::with_capacity(retention.min(4096)),
            retention,
        }
    }

    /// Appends a line, evicting the oldest one once the retention cap is hit.
    pub fn append(&mut self, line: LogLine) {
        if self.lines.len() >= self.retention {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Returns the last `n` lines in arrival order.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let start = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(start).cloned().collect()
    }

    /// Number of lines currently retained.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` when nothing has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Maximum number of lines kept.
    pub fn retention(&self) -> usize {
        self.retention
    }
}
