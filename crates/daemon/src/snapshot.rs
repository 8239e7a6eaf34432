//! Snapshot aggregation
//!
//! Read-only views over the session registry and rate meters. The full
//! [`AggregateView`] feeds the dashboard; the lighter [`TelemetrySnapshot`]
//! is what subscribers on the telemetry socket receive.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::ErrorLog;
use crate::rate_meter::RateMeterBank;
use crate::session_tracker::{Session, SessionRegistry};

/// Searches started longer ago than this are left out of the timeline.
pub const DHT_WINDOW_MS: u64 = 45_000;

/// Maximum timeline entries per session.
pub const DHT_TIMELINE_LIMIT: usize = 15;

/// Number of processing errors carried in the full view.
pub const VIEW_ERROR_COUNT: usize = 5;

/// Full state summary for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateView {
    pub node_id: String,
    pub generated_at: u64,
    /// Size of the want-list last advertised to a new peer.
    pub wantlist_size: u64,
    /// Most recent session first.
    pub sessions: Vec<SessionView>,
    /// Last few processing errors, oldest first.
    pub recent_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: u64,
    pub uuid: String,
    pub first_key: Option<String>,
    pub wanted: usize,
    pub received: usize,
    pub created_at: u64,
    pub completed_at: Option<u64>,
    pub advertised_count: u64,
    pub advertised_peers: usize,
    pub dht_searches: Vec<DhtSearchView>,
    pub peers: Vec<PeerView>,
}

impl SessionView {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DhtSearchView {
    pub key: String,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    /// Time from start to finish, session completion, or now.
    pub elapsed_ms: u64,
    /// The search finished or its session completed.
    pub settled: bool,
    /// Providers found, sorted.
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerView {
    pub peer_id: String,
    /// Keys this peer delivered first.
    pub received: usize,
    pub duplicates: usize,
    pub dht: bool,
    pub dht_error: bool,
    /// Live inbound bytes/second; only reported for active sessions.
    pub rate_in: Option<f64>,
    pub rate_out: Option<f64>,
}

/// Lightweight summary pushed to telemetry subscribers.
///
/// Serializes as `{nodeId, date, blockCount, peers: {peerId: {received, duplicates}}}`.
///
/// `blockCount` is the total of wanted keys over all sessions. Each peer's
/// `received` and `duplicates` are summed over every session the peer served,
/// completed ones included; they are not the figures of any single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub node_id: String,
    pub date: u64,
    pub block_count: usize,
    pub peers: BTreeMap<String, PeerTally>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerTally {
    pub received: usize,
    pub duplicates: usize,
}

/// Build the full dashboard view.
pub fn aggregate_view(
    node_id: &str,
    sessions: &SessionRegistry,
    meters: &RateMeterBank,
    errors: &ErrorLog,
    wantlist_size: u64,
    now: u64,
) -> AggregateView {
    let mut ordered: Vec<&Session> = sessions.iter().collect();
    ordered.sort_by(|a, b| {
        b.id.cmp(&a.id)
            .then(b.created_at.cmp(&a.created_at))
            .then(a.uuid.cmp(&b.uuid))
    });

    AggregateView {
        node_id: node_id.to_string(),
        generated_at: now,
        wantlist_size,
        sessions: ordered
            .into_iter()
            .map(|s| session_view(s, meters, now))
            .collect(),
        recent_errors: errors
            .recent(VIEW_ERROR_COUNT)
            .map(|e| e.to_string())
            .collect(),
    }
}

fn session_view(session: &Session, meters: &RateMeterBank, now: u64) -> SessionView {
    let active = !session.is_completed();
    let peers = session
        .peers
        .iter()
        .map(|(peer_id, stat)| {
            let rates = if active { meters.rates(peer_id, now) } else { None };
            PeerView {
                peer_id: peer_id.clone(),
                received: stat.unique_received(),
                duplicates: stat.duplicates(),
                dht: stat.dht,
                dht_error: stat.dht_error,
                rate_in: rates.map(|r| r.inbound),
                rate_out: rates.map(|r| r.outbound),
            }
        })
        .collect();

    SessionView {
        id: session.id,
        uuid: session.uuid.clone(),
        first_key: session.first_key.clone(),
        wanted: session.wanted_keys.len(),
        received: session.received_keys.len(),
        created_at: session.created_at,
        completed_at: session.completed_at,
        advertised_count: session.incoming_advertised_count,
        advertised_peers: session.incoming_advertised_peers.len(),
        dht_searches: dht_timeline(session, now),
        peers,
    }
}

/// Searches started within the window, newest first (ties by key), capped.
fn dht_timeline(session: &Session, now: u64) -> Vec<DhtSearchView> {
    let mut recent: Vec<(&String, &crate::session_tracker::DhtSearch)> = session
        .dht_searches
        .iter()
        .filter(|(_, search)| search.started_at + DHT_WINDOW_MS >= now)
        .collect();
    recent.sort_by(|(ka, a), (kb, b)| b.started_at.cmp(&a.started_at).then(ka.cmp(kb)));
    recent.truncate(DHT_TIMELINE_LIMIT);

    recent
        .into_iter()
        .map(|(key, search)| {
            let end = search
                .finished_at
                .or(session.completed_at)
                .unwrap_or(now);
            DhtSearchView {
                key: key.clone(),
                started_at: search.started_at,
                finished_at: search.finished_at,
                elapsed_ms: end.saturating_sub(search.started_at),
                settled: search.finished_at.is_some() || session.is_completed(),
                providers: search.found_providers.iter().cloned().collect(),
            }
        })
        .collect()
}

/// Build the telemetry summary.
///
/// Peer tallies are summed across every session the peer took part in.
pub fn telemetry_snapshot(node_id: &str, sessions: &SessionRegistry, now: u64) -> TelemetrySnapshot {
    let mut peers: BTreeMap<String, PeerTally> = BTreeMap::new();
    let mut block_count = 0;
    for session in sessions.iter() {
        block_count += session.wanted_keys.len();
        for (peer_id, stat) in &session.peers {
            let tally = peers.entry(peer_id.clone()).or_default();
            tally.received += stat.unique_received();
            tally.duplicates += stat.duplicates();
        }
    }
    TelemetrySnapshot {
        node_id: node_id.to_string(),
        date: now,
        block_count,
        peers,
    }
}
