//! Telemetry broadcast
//!
//! Snapshots are serialized once and fanned out to every telemetry
//! subscriber through a broadcast channel. Slow subscribers lag and skip
//! frames; the sender never waits on them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::snapshot::TelemetrySnapshot;

/// A serialized frame ready to be written to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryFrame {
    /// JSON-encoded [`TelemetrySnapshot`].
    Snapshot(Arc<str>),
}

impl TelemetryFrame {
    pub fn snapshot(snapshot: &TelemetrySnapshot) -> serde_json::Result<Self> {
        Ok(TelemetryFrame::Snapshot(serde_json::to_string(snapshot)?.into()))
    }

    pub fn as_text(&self) -> &str {
        match self {
            TelemetryFrame::Snapshot(json) => &**json,
        }
    }
}

pub type FrameSender = broadcast::Sender<TelemetryFrame>;
pub type FrameReceiver = broadcast::Receiver<TelemetryFrame>;

pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    broadcast::channel(capacity)
}

/// Send a frame to current subscribers. Returns how many received it.
pub fn publish(tx: &FrameSender, frame: TelemetryFrame) -> usize {
    match tx.send(frame) {
        Ok(n) => n,
        Err(_) => {
            trace!("No telemetry subscribers");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> TelemetrySnapshot {
        TelemetrySnapshot {
            node_id: "QmMe".into(),
            date: 1,
            block_count: 2,
            peers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_frame_text() {
        let frame = TelemetryFrame::snapshot(&sample()).unwrap();
        assert_eq!(
            frame.as_text(),
            r#"{"nodeId":"QmMe","date":1,"blockCount":2,"peers":{}}"#
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let (tx, rx) = frame_channel(4);
        drop(rx);
        assert_eq!(publish(&tx, TelemetryFrame::snapshot(&sample()).unwrap()), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let (tx, mut rx) = frame_channel(4);
        let mut rx2 = tx.subscribe();
        let frame = TelemetryFrame::snapshot(&sample()).unwrap();
        assert_eq!(publish(&tx, frame.clone()), 2);
        assert_eq!(rx.recv().await.unwrap(), frame);
        assert_eq!(rx2.recv().await.unwrap(), frame);
    }
}
