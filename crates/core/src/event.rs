//! Log event classification
//!
//! Each log record carries a `system` tag and an `event` tag. Routing is a
//! two-level match on those tags; every recognized combination becomes one
//! [`LogEvent`] variant and anything else becomes [`LogEvent::Unrecognized`].
//!
//! Both the neutral tag names and the names emitted by an instrumented node
//! are accepted (e.g. `exchange` / `bitswap`).

use serde_json::Value;

use crate::{CoreError, Direction, Result, EXCHANGE_PROTOCOL_MARKER};

/// A classified log record. Transient: consumed by dispatch, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A retrieval session reported its want-list, optionally with a receipt.
    SessionObserved {
        session_id: u64,
        uuid: String,
        keys: Vec<String>,
        /// Peer that delivered `keys`, when the record reports a receipt.
        received_from: Option<String>,
    },
    /// A DHT provider search began for `key`.
    ProviderSearchStarted { key: String },
    /// The DHT returned `provider` for `key`.
    ProviderFound { key: String, provider: String },
    /// Dialing a DHT-discovered provider failed.
    ProviderConnectError { key: String, provider: String },
    /// The exchange finished the retrieval session.
    SessionDone { uuid: String },
    /// The want-list was sent to a newly connected peer.
    WantListAdvertised { wants_len: u64, peer: String },
    /// The network layer finished the provider search for `key`.
    ProviderSearchFinished { key: String },
    /// Bytes moved on an exchange-protocol stream.
    Transfer {
        peer: String,
        direction: Direction,
        bytes: u64,
    },
    /// Any record shape this monitor does not track.
    Unrecognized,
}

/// Result of classifying one record.
///
/// `warnings` carries non-fatal problems found while extracting the event
/// (e.g. an undecodable key list); the event itself is still usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub event: LogEvent,
    pub warnings: Vec<CoreError>,
}

impl Classified {
    fn clean(event: LogEvent) -> Result<Self> {
        Ok(Self { event, warnings: Vec::new() })
    }
}

impl LogEvent {
    /// Classify a parsed record by its `system` and `event` tags.
    ///
    /// Returns `Err` only for recognized records missing a required field.
    pub fn classify(record: &Value) -> Result<Classified> {
        let system = record.get("system").and_then(Value::as_str).unwrap_or_default();
        let kind = record.get("event").and_then(Value::as_str).unwrap_or_default();
        let fields = Fields { record, system, kind };

        match system {
            "session-protocol" | "jimbssess" => fields.session_observed(),
            "exchange" | "bitswap" => match kind {
                "provider-search-started" | "jimprovfind" => {
                    Classified::clean(LogEvent::ProviderSearchStarted { key: fields.key()? })
                }
                "provider-found" | "jimprovfound" => Classified::clean(LogEvent::ProviderFound {
                    key: fields.key()?,
                    provider: fields.string("provider")?,
                }),
                "provider-connect-error" | "jimprovconnerror" => {
                    Classified::clean(LogEvent::ProviderConnectError {
                        key: fields.key()?,
                        provider: fields.string("provider")?,
                    })
                }
                "session-done" | "jimbssessdone" => {
                    Classified::clean(LogEvent::SessionDone { uuid: fields.session_uuid()? })
                }
                "want-list-advertised" | "jimbspeermanconnectaddwants" => {
                    Classified::clean(LogEvent::WantListAdvertised {
                        wants_len: fields.unsigned("initialWantsLen")?,
                        peer: fields.string("peer")?,
                    })
                }
                _ => Classified::clean(LogEvent::Unrecognized),
            },
            "exchange-network" | "bitswap_network" => match kind {
                "provider-search-finished" | "jimprovfinish" => {
                    Classified::clean(LogEvent::ProviderSearchFinished { key: fields.key()? })
                }
                _ => Classified::clean(LogEvent::Unrecognized),
            },
            "peer-net" | "jimnet" => fields.transfer(),
            _ => Classified::clean(LogEvent::Unrecognized),
        }
    }
}

/// Field extraction over one record, carrying its tags for error reporting.
struct Fields<'a> {
    record: &'a Value,
    system: &'a str,
    kind: &'a str,
}

impl<'a> Fields<'a> {
    fn schema_error(&self, field: &'static str) -> CoreError {
        CoreError::Schema {
            system: self.system.to_string(),
            event: self.kind.to_string(),
            field,
        }
    }

    fn string(&self, field: &'static str) -> Result<String> {
        self.record
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.schema_error(field))
    }

    fn unsigned(&self, field: &'static str) -> Result<u64> {
        self.record
            .get(field)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.schema_error(field))
    }

    /// Content key in link form: `{"key": {"/": "<key>"}}`.
    fn key(&self) -> Result<String> {
        self.record
            .get("key")
            .and_then(|k| k.get("/"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.schema_error("key"))
    }

    /// Session UUID: `{"sessionUuid": {"GetBlockRequest": "<uuid>"}}`.
    fn session_uuid(&self) -> Result<String> {
        self.record
            .get("sessionUuid")
            .and_then(|u| u.get("GetBlockRequest"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.schema_error("sessionUuid"))
    }

    fn session_observed(&self) -> Result<Classified> {
        let uuid = self.session_uuid()?;
        let session_id = self.unsigned("sessionId")?;
        let mut warnings = Vec::new();
        // A receipt without its peer still carries a usable want-list.
        let received_from = match self.kind {
            "receive-from" | "receivefrom" => match self.string("peer") {
                Ok(peer) => Some(peer),
                Err(e) => {
                    warnings.push(e);
                    None
                }
            },
            _ => None,
        };
        let keys = match parse_key_list(self.record.get("keys")) {
            Ok(keys) => keys,
            Err(e) => {
                warnings.push(e);
                Vec::new()
            }
        };
        Ok(Classified {
            event: LogEvent::SessionObserved {
                session_id,
                uuid,
                keys,
                received_from,
            },
            warnings,
        })
    }

    fn transfer(&self) -> Result<Classified> {
        let proto = self.string("proto")?;
        if !proto.contains(EXCHANGE_PROTOCOL_MARKER) {
            return Classified::clean(LogEvent::Unrecognized);
        }
        let Some(direction) = Direction::from_tag(self.kind) else {
            return Classified::clean(LogEvent::Unrecognized);
        };
        Classified::clean(LogEvent::Transfer {
            peer: self.string("peer")?,
            direction,
            bytes: self.unsigned("size")?,
        })
    }
}

/// Decode a want-list payload into content keys.
///
/// The node logs the list as a JSON-encoded string of link objects
/// (`"[{\"/\":\"k1\"}]"`); an already-decoded array is accepted too.
/// Links without a `/` member are skipped.
pub fn parse_key_list(payload: Option<&Value>) -> Result<Vec<String>> {
    let decoded;
    let links = match payload {
        Some(Value::String(text)) => {
            decoded = serde_json::from_str::<Value>(text)
                .map_err(|e| CoreError::InvalidKeyList(e.to_string()))?;
            &decoded
        }
        Some(value @ Value::Array(_)) => value,
        Some(other) => {
            return Err(CoreError::InvalidKeyList(format!(
                "expected a link list, got {}",
                type_name(other)
            )))
        }
        None => return Err(CoreError::InvalidKeyList("missing `keys`".into())),
    };
    let links = links.as_array().ok_or_else(|| {
        CoreError::InvalidKeyList(format!("expected a link list, got {}", type_name(links)))
    })?;
    Ok(links
        .iter()
        .filter_map(|link| link.get("/").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
