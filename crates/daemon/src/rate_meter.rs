//! Per-peer throughput meters
//!
//! Tracks inbound and outbound exchange-protocol bytes per peer and reports a
//! rolling bytes/second rate. Meters live independently of sessions. A peer
//! with no sample for [`IDLE_EVICTION_MS`] reads as absent; stale entries are
//! dropped by [`RateMeterBank::evict_idle`] or simply ignored on read.

use std::collections::{HashMap, VecDeque};

use bitspy_core::Direction;

/// A meter with no sample for this long reads as absent.
pub const IDLE_EVICTION_MS: u64 = 10_000;

/// Rates below this many bytes/second are reported as zero.
pub const NOISE_FLOOR_BPS: f64 = 200.0;

/// Width of the rolling rate window.
pub const RATE_WINDOW_MS: u64 = 5_000;

/// Upper bound on retained samples per direction.
const MAX_SAMPLES: usize = 512;

/// Sliding-window byte counter for one direction.
#[derive(Debug, Clone, Default)]
struct Window {
    /// (timestamp ms, bytes)
    samples: VecDeque<(u64, u64)>,
    first_sample_at: Option<u64>,
}

impl Window {
    fn record(&mut self, now: u64, bytes: u64) {
        self.first_sample_at.get_or_insert(now);
        self.samples.push_back((now, bytes));
        self.prune(now);
        if self.samples.len() > MAX_SAMPLES {
            let excess = self.samples.len() - MAX_SAMPLES;
            self.samples.drain(..excess);
        }
    }

    fn prune(&mut self, now: u64) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.saturating_sub(at) > RATE_WINDOW_MS {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes/second over the window ending at `now`.
    ///
    /// A young meter divides by its age (at least one second) rather than
    /// the full window, so a fresh transfer is not under-reported.
    fn rate(&self, now: u64) -> f64 {
        let Some(first) = self.first_sample_at else {
            return 0.0;
        };
        let total: u64 = self
            .samples
            .iter()
            .filter(|(at, _)| now.saturating_sub(*at) <= RATE_WINDOW_MS)
            .map(|(_, bytes)| bytes)
            .sum();
        let span_ms = now.saturating_sub(first).clamp(1_000, RATE_WINDOW_MS);
        total as f64 * 1000.0 / span_ms as f64
    }
}

/// Inbound/outbound meters for one peer.
#[derive(Debug, Clone)]
pub struct RateMeter {
    inbound: Window,
    outbound: Window,
    pub created_at: u64,
    pub last_updated_at: u64,
}

impl RateMeter {
    fn new(now: u64) -> Self {
        Self {
            inbound: Window::default(),
            outbound: Window::default(),
            created_at: now,
            last_updated_at: now,
        }
    }

    fn record(&mut self, direction: Direction, bytes: u64, now: u64) {
        match direction {
            Direction::In => self.inbound.record(now, bytes),
            Direction::Out => self.outbound.record(now, bytes),
        }
        self.last_updated_at = now;
    }

    pub fn is_idle(&self, now: u64) -> bool {
        now.saturating_sub(self.last_updated_at) >= IDLE_EVICTION_MS
    }

    /// Inbound rate in bytes/second, noise-floored.
    pub fn inbound_rate(&self, now: u64) -> f64 {
        clamp_noise(self.inbound.rate(now))
    }

    /// Outbound rate in bytes/second, noise-floored.
    pub fn outbound_rate(&self, now: u64) -> f64 {
        clamp_noise(self.outbound.rate(now))
    }
}

fn clamp_noise(rate: f64) -> f64 {
    if rate > NOISE_FLOOR_BPS {
        rate
    } else {
        0.0
    }
}

/// Live rates for one peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerRates {
    pub inbound: f64,
    pub outbound: f64,
}

/// All per-peer meters.
#[derive(Debug, Default)]
pub struct RateMeterBank {
    meters: HashMap<String, RateMeter>,
}

impl RateMeterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `bytes` moved in `direction` with `peer`.
    pub fn sample(&mut self, peer: &str, direction: Direction, bytes: u64, now: u64) {
        self.meters
            .entry(peer.to_string())
            .or_insert_with(|| RateMeter::new(now))
            .record(direction, bytes, now);
    }

    /// Live meter for `peer`, or None if it never sampled or went idle.
    pub fn get(&self, peer: &str, now: u64) -> Option<&RateMeter> {
        self.meters.get(peer).filter(|m| !m.is_idle(now))
    }

    pub fn inbound_rate(&self, peer: &str, now: u64) -> Option<f64> {
        self.get(peer, now).map(|m| m.inbound_rate(now))
    }

    pub fn outbound_rate(&self, peer: &str, now: u64) -> Option<f64> {
        self.get(peer, now).map(|m| m.outbound_rate(now))
    }

    pub fn rates(&self, peer: &str, now: u64) -> Option<PeerRates> {
        self.get(peer, now).map(|m| PeerRates {
            inbound: m.inbound_rate(now),
            outbound: m.outbound_rate(now),
        })
    }

    /// Drop meters that went idle. Returns how many were removed.
    pub fn evict_idle(&mut self, now: u64) -> usize {
        let before = self.meters.len();
        self.meters.retain(|_, meter| !meter.is_idle(now));
        before - self.meters.len()
    }

    /// Number of retained meters, including idle ones not yet evicted.
    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
