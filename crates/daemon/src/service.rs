//! Monitor service
//!
//! Wires the node client, engine, dashboard and telemetry server together
//! and runs them until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use bitspy_client::{LogStream, NodeClient};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::dashboard;
use crate::engine::Engine;
use crate::errors::{DaemonError, TAG_STREAM};
use crate::events::{self, FrameSender, TelemetryFrame};
use crate::ws_server;

/// Engine shared by the ingestion loop and the periodic ticks.
pub type SharedEngine = Arc<Mutex<Engine>>;

/// Frames buffered per telemetry subscriber before it starts skipping.
const TELEMETRY_CHANNEL_CAPACITY: usize = 16;

/// Run the monitor until Ctrl-C or a fatal startup error.
pub async fn run_monitor(config: MonitorConfig) -> Result<(), DaemonError> {
    let client = NodeClient::new(config.api_url.clone());
    let node_id = client.id().await?;
    info!("Monitoring node {} at {}", node_id, client.api_url());

    let engine: SharedEngine = Arc::new(Mutex::new(Engine::new(node_id)));
    let (frame_tx, _frame_rx) = events::frame_channel(TELEMETRY_CHANNEL_CAPACITY);

    let listener = if config.ws_port > 0 {
        Some(ws_server::bind(config.ws_port).await?)
    } else {
        info!("Telemetry server disabled");
        None
    };
    let ws_future = {
        let frame_tx = frame_tx.clone();
        let engine = engine.clone();
        async move {
            match listener {
                Some(listener) => ws_server::serve(listener, frame_tx, engine).await,
                // Disabled: park forever so select! doesn't short-circuit
                None => std::future::pending::<()>().await,
            }
        }
    };

    let dashboard_future = {
        let engine = engine.clone();
        let interval = Duration::from_millis(config.render_interval_ms.max(1));
        let enabled = config.dashboard;
        async move {
            if enabled {
                render_loop(engine, interval).await
            } else {
                std::future::pending::<()>().await
            }
        }
    };

    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
    let telemetry_interval = Duration::from_millis(config.telemetry_interval_ms.max(1));

    tokio::select! {
        _ = run_ingest_loop(client, engine.clone(), reconnect_delay) => {
            info!("Ingest loop ended");
        }
        _ = telemetry_loop(engine.clone(), frame_tx, telemetry_interval) => {
            info!("Telemetry loop ended");
        }
        _ = dashboard_future => {
            info!("Dashboard loop ended");
        }
        _ = ws_future => {
            info!("Telemetry server ended");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
        }
    }

    Ok(())
}

/// Tail the node's log forever, reconnecting whenever the stream ends.
pub async fn run_ingest_loop(client: NodeClient, engine: SharedEngine, reconnect_delay: Duration) {
    loop {
        match client.log_tail().await {
            Ok(stream) => {
                let bytes = ingest_stream(stream, &engine).await;
                debug!("Log tail ended after {} bytes, reconnecting", bytes);
            }
            Err(e) => {
                warn!("Failed to open log tail: {}", e);
                engine
                    .lock()
                    .await
                    .record_error(TAG_STREAM, format!("log tail: {}", e));
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

/// Feed one log-tail response into the engine until it ends. Returns bytes read.
pub async fn ingest_stream(mut stream: LogStream, engine: &SharedEngine) -> u64 {
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                total += bytes.len() as u64;
                engine.lock().await.ingest(&bytes);
            }
            Err(e) => {
                warn!("Log tail read error: {}", e);
                engine
                    .lock()
                    .await
                    .record_error(TAG_STREAM, format!("log tail read: {}", e));
                break;
            }
        }
    }
    engine.lock().await.stream_restarted();
    total
}

async fn telemetry_loop(engine: SharedEngine, frames: FrameSender, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let snapshot = engine.lock().await.telemetry_tick();
        match TelemetryFrame::snapshot(&snapshot) {
            Ok(frame) => {
                let delivered = events::publish(&frames, frame);
                debug!("Telemetry frame sent to {} subscribers", delivered);
            }
            Err(e) => error!("Failed to encode telemetry snapshot: {}", e),
        }
    }
}

async fn render_loop(engine: SharedEngine, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let view = {
            let mut engine = engine.lock().await;
            engine.evict_idle_meters(crate::session_tracker::now_ms());
            engine.snapshot()
        };
        let lines = dashboard::render_lines(&view, dashboard::terminal_rows());
        if let Err(e) = dashboard::paint(&lines) {
            warn!("Dashboard paint failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use bitspy_client::ClientError;

    fn stream_of(chunks: Vec<Result<Bytes, ClientError>>) -> LogStream {
        Box::pin(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_ingest_stream_reassembles_chunks() {
        let engine: SharedEngine = Arc::new(Mutex::new(Engine::new("me")));
        let record = r#"{"system":"session-protocol","event":"want","sessionId":1,"sessionUuid":{"GetBlockRequest":"u1"},"keys":"[{\"/\":\"k1\"}]"}"#;
        let (a, b) = record.split_at(20);
        let stream = stream_of(vec![
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(format!("{}\n", b))),
        ]);
        let total = ingest_stream(stream, &engine).await;
        assert_eq!(total, record.len() as u64 + 1);
        assert!(engine.lock().await.session("u1").is_some());
    }

    #[tokio::test]
    async fn test_stream_end_drops_partial_record() {
        let engine: SharedEngine = Arc::new(Mutex::new(Engine::new("me")));
        ingest_stream(stream_of(vec![Ok(Bytes::from_static(b"{\"system\":"))]), &engine).await;
        // The next stream starts clean instead of gluing onto the old fragment.
        let next = r#"{"system":"exchange","event":"session-done","sessionUuid":{"GetBlockRequest":"x"}}"#;
        ingest_stream(stream_of(vec![Ok(Bytes::from(format!("{}\n", next)))]), &engine).await;
        assert!(engine.lock().await.errors().is_empty());
    }

    #[tokio::test]
    async fn test_read_error_recorded() {
        let engine: SharedEngine = Arc::new(Mutex::new(Engine::new("me")));
        let err = ClientError::InvalidResponse {
            endpoint: "/api/v0/log/tail",
            reason: "reset".into(),
        };
        ingest_stream(stream_of(vec![Err(err)]), &engine).await;
        let engine = engine.lock().await;
        let entry = engine.errors().recent(1).next().unwrap();
        assert_eq!(entry.tag, TAG_STREAM);
    }
}
