//! Bitspy Monitor
//!
//! Tails a content-exchange node's event log and reconstructs, live:
//! - block-retrieval sessions and which peers served which blocks
//! - DHT provider searches and how long they took
//! - per-peer transfer throughput
//!
//! The state feeds a terminal dashboard and a WebSocket telemetry feed.

pub mod config;
pub mod dashboard;
pub mod engine;
pub mod errors;
pub mod events;
pub mod logging;
pub mod rate_meter;
pub mod service;
pub mod session_tracker;
pub mod snapshot;
pub mod ws_server;
