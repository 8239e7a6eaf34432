//! Processing errors and daemon failures
//!
//! Processing errors never stop ingestion: they are kept in a bounded
//! [`ErrorLog`] that the dashboard tails. [`DaemonError`] covers the few
//! failures that do end the process (startup identity lookup, binding the
//! telemetry port, logger setup).

use std::collections::VecDeque;
use std::fmt;

use bitspy_client::ClientError;
use bitspy_core::CoreError;
use thiserror::Error;

/// Number of processing errors retained.
pub const ERROR_LOG_CAPACITY: usize = 64;

/// Tag for log-tail connection and read failures.
pub const TAG_STREAM: &str = "stream";

/// Tag for text sent by telemetry subscribers.
pub const TAG_WS: &str = "ws";

/// One recorded processing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingError {
    /// Short category (`parse`, `schema`, `keys`, `stream`, `ws`).
    pub tag: &'static str,
    pub message: String,
    /// Wall-clock milliseconds when recorded.
    pub at: u64,
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tag, self.message)
    }
}

/// Rolling log of the most recent processing errors.
#[derive(Debug)]
pub struct ErrorLog {
    entries: VecDeque<ProcessingError>,
    capacity: usize,
    total: u64,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::with_capacity(ERROR_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    pub fn record(&mut self, tag: &'static str, message: impl Into<String>, at: u64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ProcessingError {
            tag,
            message: message.into(),
            at,
        });
        self.total += 1;
    }

    pub fn record_core(&mut self, err: &CoreError, at: u64) {
        self.record(err.tag(), err.to_string(), at);
    }

    /// The last `n` errors, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ProcessingError> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    /// Errors recorded since startup, including ones rotated out.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Failures that end the monitor.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("node client: {0}")]
    Client(#[from] ClientError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_recent() {
        let mut log = ErrorLog::new();
        log.record("parse", "bad", 1);
        log.record("keys", "worse", 2);
        let recent: Vec<String> = log.recent(5).map(|e| e.to_string()).collect();
        assert_eq!(recent, vec!["parse: bad", "keys: worse"]);
    }

    #[test]
    fn test_rolls_over_at_capacity() {
        let mut log = ErrorLog::with_capacity(3);
        for i in 0..5u64 {
            log.record("parse", format!("e{}", i), i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total(), 5);
        let recent: Vec<&str> = log.recent(2).map(|e| e.message.as_str()).collect();
        assert_eq!(recent, vec!["e3", "e4"]);
    }

    #[test]
    fn test_record_core_uses_tag() {
        let mut log = ErrorLog::new();
        log.record_core(&CoreError::InvalidKeyList("eof".into()), 7);
        let entry = log.recent(1).next().unwrap();
        assert_eq!(entry.tag, "keys");
        assert_eq!(entry.at, 7);
        assert_eq!(entry.message, "invalid key list: eof");
    }

    #[test]
    fn test_empty_log() {
        let log = ErrorLog::default();
        assert!(log.is_empty());
        assert_eq!(log.recent(5).count(), 0);
    }
}
