//! bitspy Core
//!
//! Wire-level vocabulary for observing a content-exchange node through its
//! structured event log:
//! - `framing` — reassembly of the chunked JSON log stream into records
//! - `event` — classification of records into typed [`LogEvent`]s
//! - [`CoreError`] — the processing-error taxonomy shared with the daemon

pub mod event;
pub mod framing;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use event::{Classified, LogEvent};
pub use framing::{ChunkReassembler, Reassembled};

/// Substring identifying the block-exchange protocol in transport log records.
pub const EXCHANGE_PROTOCOL_MARKER: &str = "bitswap";

/// Direction of a transport-level byte transfer, relative to the monitored node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Parse the `event` tag of a transport record (`in` / `out`).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// Non-fatal errors raised while turning log bytes into events.
///
/// None of these abort processing; the daemon records them in its rolling
/// error log and moves on to the next record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The buffered log text is not valid JSON (and not merely truncated).
    #[error("{0}")]
    Parse(String),

    /// A recognized record is missing a required field or has the wrong type.
    #[error("{system}/{event}: missing or invalid `{field}`")]
    Schema {
        system: String,
        event: String,
        field: &'static str,
    },

    /// The want-list payload of a session record could not be decoded.
    #[error("invalid key list: {0}")]
    InvalidKeyList(String),
}

impl CoreError {
    /// Short tag used when surfacing the error in the rolling error log.
    pub fn tag(&self) -> &'static str {
        match self {
            CoreError::Parse(_) => "parse",
            CoreError::Schema { .. } => "schema",
            CoreError::InvalidKeyList(_) => "keys",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_tags() {
        assert_eq!(Direction::from_tag("in"), Some(Direction::In));
        assert_eq!(Direction::from_tag("out"), Some(Direction::Out));
        assert_eq!(Direction::from_tag("sideways"), None);
        assert_eq!(Direction::Out.to_string(), "out");
    }

    #[test]
    fn test_error_tags() {
        assert_eq!(CoreError::Parse("x".into()).tag(), "parse");
        assert_eq!(CoreError::InvalidKeyList("x".into()).tag(), "keys");
        let schema = CoreError::Schema {
            system: "exchange".into(),
            event: "session-done".into(),
            field: "sessionUuid",
        };
        assert_eq!(schema.tag(), "schema");
        assert_eq!(
            schema.to_string(),
            "exchange/session-done: missing or invalid `sessionUuid`"
        );
    }
}
