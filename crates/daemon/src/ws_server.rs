//! Telemetry WebSocket server
//!
//! Accepts WebSocket connections, greets each subscriber once, then pushes
//! every telemetry frame published on the broadcast channel. Subscribers
//! never acknowledge; a subscriber that falls behind skips frames. Text a
//! subscriber sends lands in the engine's error log so it shows on the
//! dashboard.

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::errors::TAG_WS;
use crate::events::{FrameReceiver, FrameSender};
use crate::service::SharedEngine;

/// First text frame sent to every subscriber.
pub const GREETING: &str = "bitspy";

/// Bind the telemetry listener on all interfaces.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Telemetry server listening on ws://{}", listener.local_addr()?);
    Ok(listener)
}

/// Serve subscribers forever on an already-bound listener.
pub async fn serve(listener: TcpListener, frames: FrameSender, engine: SharedEngine) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                // Subscribe before the handshake so no frame after the greeting is missed.
                let rx = frames.subscribe();
                let engine = engine.clone();
                tokio::spawn(async move {
                    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            debug!("WebSocket handshake failed from {}: {}", peer, e);
                            return;
                        }
                    };
                    debug!("Telemetry subscriber connected: {}", peer);
                    handle_subscriber(ws_stream, rx, engine, peer).await;
                    debug!("Telemetry subscriber disconnected: {}", peer);
                });
            }
            Err(e) => {
                error!("Failed to accept TCP connection: {}", e);
            }
        }
    }
}

async fn handle_subscriber(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut frames: FrameReceiver,
    engine: SharedEngine,
    peer: std::net::SocketAddr,
) {
    let (mut sink, mut stream) = ws_stream.split();

    if sink.send(Message::text(GREETING)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if sink.send(Message::text(frame.as_text())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Telemetry subscriber {} lagged, skipped {} frames", peer, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!("Telemetry subscriber {} says: {}", peer, text.as_str());
                    engine
                        .lock()
                        .await
                        .record_error(TAG_WS, format!("received: {}", text.as_str()));
                }
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // Ignore binary, pong, etc.
                Some(Err(e)) => {
                    debug!("WebSocket read error from {}: {}", peer, e);
                    break;
                }
            },
        }
    }
}
