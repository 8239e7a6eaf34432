//! Event correlation engine
//!
//! Owns the session registry, key index, rate meters and error log, and
//! applies classified log events to them. All mutation goes through one
//! `&mut Engine`, so callers serialize access by owning it (or wrapping it
//! in a single mutex).

use bitspy_core::{ChunkReassembler, LogEvent};
use serde_json::Value;
use tracing::{debug, trace};

use crate::errors::ErrorLog;
use crate::rate_meter::RateMeterBank;
use crate::session_tracker::{now_ms, KeyIndex, Session, SessionRegistry};
use crate::snapshot::{self, AggregateView, TelemetrySnapshot};

/// Session and throughput state reconstructed from the node's event log.
pub struct Engine {
    node_id: String,
    reassembler: ChunkReassembler,
    sessions: SessionRegistry,
    keys: KeyIndex,
    meters: RateMeterBank,
    errors: ErrorLog,
    wantlist_size: u64,
}

impl Engine {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            reassembler: ChunkReassembler::new(),
            sessions: SessionRegistry::new(),
            keys: KeyIndex::new(),
            meters: RateMeterBank::new(),
            errors: ErrorLog::new(),
            wantlist_size: 0,
        }
    }

    /// Feed a raw chunk of the log stream. Returns the number of records dispatched.
    pub fn ingest(&mut self, chunk: &[u8]) -> usize {
        self.ingest_at(chunk, now_ms())
    }

    pub fn ingest_at(&mut self, chunk: &[u8], now: u64) -> usize {
        let out = self.reassembler.feed(chunk);
        if let Some(err) = &out.error {
            debug!("Discarding unparseable log text: {}", err);
            self.errors.record_core(err, now);
        }
        for record in &out.records {
            self.dispatch_at(record, now);
        }
        out.records.len()
    }

    /// Forget a partial record left over from a stream that ended.
    pub fn stream_restarted(&mut self) {
        let dropped = self.reassembler.reset();
        if dropped > 0 {
            debug!("Dropped {} bytes of partial record on stream restart", dropped);
        }
    }

    /// Classify and apply one parsed record. Never fails; problems land in the error log.
    pub fn dispatch(&mut self, record: &Value) {
        self.dispatch_at(record, now_ms());
    }

    pub fn dispatch_at(&mut self, record: &Value, now: u64) {
        match LogEvent::classify(record) {
            Ok(classified) => {
                for warning in &classified.warnings {
                    self.errors.record_core(warning, now);
                }
                self.apply(classified.event, now);
            }
            Err(e) => {
                debug!("Dropping malformed record: {}", e);
                self.errors.record_core(&e, now);
            }
        }
    }

    /// Apply a classified event to the engine state.
    pub fn apply(&mut self, event: LogEvent, now: u64) {
        match event {
            LogEvent::SessionObserved {
                session_id,
                uuid,
                keys,
                received_from,
            } => self.observe_session(session_id, &uuid, &keys, received_from.as_deref(), now),
            LogEvent::ProviderSearchStarted { key } => {
                self.for_interested(&key, false, |s| s.start_search(&key, now));
            }
            LogEvent::ProviderFound { key, provider } => {
                self.for_interested(&key, false, |s| s.provider_found(&key, &provider));
            }
            LogEvent::ProviderConnectError { key, provider } => {
                self.for_interested(&key, false, |s| s.provider_connect_error(&provider));
            }
            LogEvent::SessionDone { uuid } => match self.sessions.find_mut(&uuid) {
                Some(session) => {
                    session.complete(now);
                    debug!("Session {} ({}) done", session.id, uuid);
                }
                None => trace!("Done for unknown session {}", uuid),
            },
            LogEvent::WantListAdvertised { wants_len, peer } => {
                self.wantlist_size = wants_len;
                if wants_len > 0 {
                    // The record does not say which session the wants belong to.
                    for session in self.sessions.active_mut() {
                        session.record_advertisement(&peer);
                    }
                }
            }
            LogEvent::ProviderSearchFinished { key } => {
                self.for_interested(&key, true, |s| {
                    s.finish_search(&key, now);
                });
            }
            LogEvent::Transfer {
                peer,
                direction,
                bytes,
            } => self.meters.sample(&peer, direction, bytes, now),
            LogEvent::Unrecognized => {}
        }
    }

    fn observe_session(
        &mut self,
        session_id: u64,
        uuid: &str,
        keys: &[String],
        received_from: Option<&str>,
        now: u64,
    ) {
        let slot = self
            .sessions
            .get_or_create(uuid, session_id, keys.first().map(String::as_str), now);
        let Some(session) = self.sessions.get_mut(slot) else {
            return;
        };
        if session.is_completed() {
            trace!("Ignoring update for completed session {}", uuid);
            return;
        }
        for key in keys {
            session.want(key);
            self.keys.register(key, slot);
        }
        if let Some(peer) = received_from {
            for key in keys {
                session.record_receipt(peer, key);
            }
        }
    }

    /// Run `f` on every session that wanted `key`.
    fn for_interested(&mut self, key: &str, include_completed: bool, mut f: impl FnMut(&mut Session)) {
        let Some(slots) = self.keys.sessions_for(key) else {
            trace!("No session wants {}", key);
            return;
        };
        for &slot in slots {
            if let Some(session) = self.sessions.get_mut(slot) {
                if include_completed || !session.is_completed() {
                    f(session);
                }
            }
        }
    }

    /// Record a processing error raised outside event dispatch (e.g. stream failures).
    pub fn record_error(&mut self, tag: &'static str, message: impl Into<String>) {
        self.errors.record(tag, message, now_ms());
    }

    /// Drop rate meters that have gone idle.
    pub fn evict_idle_meters(&mut self, now: u64) -> usize {
        self.meters.evict_idle(now)
    }

    pub fn snapshot(&self) -> AggregateView {
        self.snapshot_at(now_ms())
    }

    pub fn snapshot_at(&self, now: u64) -> AggregateView {
        snapshot::aggregate_view(
            &self.node_id,
            &self.sessions,
            &self.meters,
            &self.errors,
            self.wantlist_size,
            now,
        )
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry_at(now_ms())
    }

    pub fn telemetry_at(&self, now: u64) -> TelemetrySnapshot {
        snapshot::telemetry_snapshot(&self.node_id, &self.sessions, now)
    }

    /// Periodic telemetry step: sweep idle meters, then summarize.
    ///
    /// The telemetry tick runs whether or not the dashboard is drawn, so the
    /// meter bank stays bounded by the peers active in the last few seconds.
    pub fn telemetry_tick(&mut self) -> TelemetrySnapshot {
        self.telemetry_tick_at(now_ms())
    }

    pub fn telemetry_tick_at(&mut self, now: u64) -> TelemetrySnapshot {
        let evicted = self.meters.evict_idle(now);
        if evicted > 0 {
            trace!("Evicted {} idle rate meters", evicted);
        }
        self.telemetry_at(now)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn session(&self, uuid: &str) -> Option<&Session> {
        self.sessions.find(uuid)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn key_index(&self) -> &KeyIndex {
        &self.keys
    }

    pub fn meters(&self) -> &RateMeterBank {
        &self.meters
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn wantlist_size(&self) -> u64 {
        self.wantlist_size
    }
}
