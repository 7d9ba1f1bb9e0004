//! Bounded per-session log buffer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::sandbox::LogStream;

/// One line of container output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    /// Per-session sequence number, starting at 1, strictly increasing
    pub seq: u64,
    pub stream: LogStream,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

/// Ring buffer of the most recent lines.
///
/// Chunks are split on newlines; an unterminated tail is held per stream
/// until the next chunk or [`LogBuffer::flush`].
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    lines: VecDeque<LogLine>,
    next_seq: u64,
    dropped: u64,
    partial_stdout: String,
    partial_stderr: String,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        LogBuffer {
            capacity: capacity.max(1),
            lines: VecDeque::new(),
            next_seq: 1,
            dropped: 0,
            partial_stdout: String::new(),
            partial_stderr: String::new(),
        }
    }

    fn partial(&mut self, stream: LogStream) -> &mut String {
        match stream {
            LogStream::Stdout => &mut self.partial_stdout,
            LogStream::Stderr => &mut self.partial_stderr,
        }
    }

    fn record(&mut self, stream: LogStream, line: String) -> LogLine {
        let entry = LogLine {
            seq: self.next_seq,
            stream,
            line,
            timestamp: Utc::now(),
        };
        self.next_seq += 1;
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(entry.clone());
        entry
    }

    /// Append a raw chunk, returning the complete lines it produced
    pub fn push_chunk(&mut self, stream: LogStream, data: &str) -> Vec<LogLine> {
        let mut pending = std::mem::take(self.partial(stream));
        pending.push_str(data);

        let mut produced = Vec::new();
        let mut rest = pending.as_str();
        while let Some(pos) = rest.find('\n') {
            let line = rest[..pos].trim_end_matches('\r').to_string();
            produced.push(self.record(stream, line));
            rest = &rest[pos + 1..];
        }
        *self.partial(stream) = rest.to_string();
        produced
    }

    /// Emit any unterminated tails as final lines
    pub fn flush(&mut self) -> Vec<LogLine> {
        let mut produced = Vec::new();
        for stream in [LogStream::Stdout, LogStream::Stderr] {
            let tail = std::mem::take(self.partial(stream));
            if !tail.is_empty() {
                produced.push(self.record(stream, tail));
            }
        }
        produced
    }

    /// Up to `n` most recent lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Lines currently held
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines ever recorded
    pub fn total(&self) -> u64 {
        self.next_seq - 1
    }

    /// Lines evicted by the ring
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_chunks_into_lines() {
        let mut buffer = LogBuffer::new(10);
        let lines = buffer.push_chunk(LogStream::Stdout, "one\ntwo\r\nthr");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, "two");
        let lines = buffer.push_chunk(LogStream::Stdout, "ee\n");
        assert_eq!(lines[0].line, "three");
        assert_eq!(lines[0].seq, 3);
    }

    #[test]
    fn test_streams_keep_separate_partials() {
        let mut buffer = LogBuffer::new(10);
        buffer.push_chunk(LogStream::Stdout, "out-");
        buffer.push_chunk(LogStream::Stderr, "err\n");
        let flushed = buffer.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].line, "out-");
        assert_eq!(flushed[0].stream, LogStream::Stdout);
        assert_eq!(buffer.total(), 2);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push_chunk(LogStream::Stdout, &format!("line {}\n", i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        let tail = buffer.tail(2);
        assert_eq!(tail[0].line, "line 3");
        assert_eq!(tail[1].seq, 5);
        assert_eq!(buffer.tail(100).len(), 3);
    }
}
