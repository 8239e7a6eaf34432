//! Chunk reassembly for the log-tail stream.
//!
//! The log tail delivers newline-delimited JSON, but transport chunk
//! boundaries do not line up with record boundaries. [`ChunkReassembler`]
//! accumulates fragments and emits every complete record, carrying a
//! truncated tail forward to the next call.

use serde_json::Value;

use crate::CoreError;

/// Output of one [`ChunkReassembler::feed`] call.
#[derive(Debug, Default, PartialEq)]
pub struct Reassembled {
    /// Complete records, in stream order.
    pub records: Vec<Value>,
    /// Set when the buffer held invalid (not merely truncated) JSON and was discarded.
    pub error: Option<CoreError>,
}

impl Reassembled {
    /// No complete record yet; the caller should feed the next chunk.
    pub fn needs_more(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accumulates raw log bytes until complete JSON records can be parsed.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    pending: Vec<u8>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the buffered remainder and parse what is complete.
    ///
    /// - complete records are returned and removed from the buffer;
    /// - a truncated trailing record stays buffered, with no error;
    /// - any other syntax error discards the whole buffer and is reported.
    pub fn feed(&mut self, chunk: &[u8]) -> Reassembled {
        self.pending.extend_from_slice(chunk);

        let mut out = Reassembled::default();
        let consumed = {
            let mut stream = serde_json::Deserializer::from_slice(&self.pending).into_iter::<Value>();
            let mut consumed = 0;
            loop {
                match stream.next() {
                    Some(Ok(record)) => {
                        consumed = stream.byte_offset();
                        out.records.push(record);
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        out.error = Some(CoreError::Parse(e.to_string()));
                        consumed = self.pending.len();
                        break;
                    }
                    None => {
                        consumed = self.pending.len();
                        break;
                    }
                }
            }
            consumed
        };
        self.pending.drain(..consumed);
        // Separators after the last record are not part of the next one.
        let leading_ws = self
            .pending
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.pending.drain(..leading_ws);
        out
    }

    /// Drop any buffered partial record (e.g. when the stream is reopened).
    pub fn reset(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Number of buffered bytes awaiting completion.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const RECORD: &str = r#"{"system":"session-protocol","event":"want","sessionId":1,"sessionUuid":{"GetBlockRequest":"u1"},"keys":"[{\"/\":\"k1\"},{\"/\":\"k2\"}]"}"#;

    #[test]
    fn test_whole_record() {
        let mut r = ChunkReassembler::new();
        let out = r.feed(RECORD.as_bytes());
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0]["sessionId"], json!(1));
        assert!(out.error.is_none());
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_truncated_record_needs_more() {
        let mut r = ChunkReassembler::new();
        let (head, tail) = RECORD.split_at(40);

        let first = r.feed(head.as_bytes());
        assert!(first.needs_more());
        assert!(first.error.is_none());
        assert_eq!(r.pending_len(), 40);

        let second = r.feed(tail.as_bytes());
        assert_eq!(second.records.len(), 1);
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_multiple_records_and_partial_tail() {
        let mut r = ChunkReassembler::new();
        let text = format!("{}\n{}\n{}", RECORD, RECORD, &RECORD[..10]);
        let out = r.feed(text.as_bytes());
        assert_eq!(out.records.len(), 2);
        assert!(out.error.is_none());
        assert_eq!(r.pending_len(), 10);

        let out = r.feed(RECORD[10..].as_bytes());
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn test_trailing_separator_not_buffered() {
        let mut r = ChunkReassembler::new();
        let out = r.feed(format!("{}\n", RECORD).as_bytes());
        assert_eq!(out.records.len(), 1);
        assert_eq!(r.pending_len(), 0);

        let out = r.feed(format!("{}\r\n  {}", RECORD, &RECORD[..5]).as_bytes());
        assert_eq!(out.records.len(), 1);
        assert_eq!(r.pending_len(), 5);
    }

    #[test]
    fn test_garbage_discards_buffer() {
        let mut r = ChunkReassembler::new();
        let out = r.feed(b"{\"system\": tru}");
        assert!(out.needs_more());
        assert_eq!(out.error.as_ref().map(CoreError::tag), Some("parse"));
        assert_eq!(r.pending_len(), 0);

        // Recovers on the next well-formed record.
        let out = r.feed(RECORD.as_bytes());
        assert_eq!(out.records.len(), 1);
        assert!(out.error.is_none());
    }

    #[test]
    fn test_whitespace_only() {
        let mut r = ChunkReassembler::new();
        let out = r.feed(b"\n\n  ");
        assert!(out.needs_more());
        assert!(out.error.is_none());
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_split_inside_multibyte_char() {
        let record = "{\"system\":\"peer-net\",\"note\":\"caf\u{e9}\"}\n";
        let bytes = record.as_bytes();
        let split = record.find('\u{e9}').unwrap() + 1;
        let mut r = ChunkReassembler::new();
        assert!(r.feed(&bytes[..split]).needs_more());
        let out = r.feed(&bytes[split..]);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0]["note"], json!("caf\u{e9}"));
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut r = ChunkReassembler::new();
        r.feed(&RECORD.as_bytes()[..25]);
        assert_eq!(r.reset(), 25);
        let out = r.feed(RECORD.as_bytes());
        assert_eq!(out.records.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_fragmentation_yields_one_record(cuts in proptest::collection::vec(0usize..RECORD.len(), 0..12)) {
            let bytes = RECORD.as_bytes();
            let mut cuts = cuts;
            cuts.sort_unstable();
            cuts.dedup();

            let mut r = ChunkReassembler::new();
            let mut records = Vec::new();
            let mut start = 0;
            for cut in cuts.into_iter().chain(std::iter::once(bytes.len())) {
                let out = r.feed(&bytes[start..cut]);
                prop_assert!(out.error.is_none());
                records.extend(out.records);
                start = cut;
            }
            prop_assert_eq!(records.len(), 1);
            prop_assert_eq!(&records[0]["sessionUuid"]["GetBlockRequest"], &json!("u1"));
            prop_assert_eq!(r.pending_len(), 0);
        }
    }
}
