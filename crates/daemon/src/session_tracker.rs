//! Retrieval session tracker
//!
//! Tracks the lifecycle of block-retrieval sessions: wanted keys, receipts per
//! peer (with duplicates), DHT provider searches and want-list advertisements.
//! Sessions are created on first sight and completed by a session-done event;
//! completed sessions stay visible for reporting.
//!
//! [`KeyIndex`] joins the want-tracking and DHT-tracking event streams: DHT
//! events carry only a bare content key, so the index maps each key to every
//! session slot that wanted it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

/// Index of a session in the [`SessionRegistry`] table.
///
/// Slots are lookup-only handles: holding one never keeps a session alive and
/// slots are stable for the lifetime of the registry.
pub type SessionSlot = usize;

/// Per (session, peer) statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStat {
    /// Keys this peer delivered within the session.
    pub received_keys: HashSet<String>,
    /// Subset of `received_keys` another peer had already delivered.
    pub duplicate_keys: HashSet<String>,
    /// Peer was discovered through a DHT provider search.
    pub dht: bool,
    /// Most recent dial to this DHT-discovered peer failed.
    pub dht_error: bool,
}

impl PeerStat {
    /// Keys delivered first by this peer.
    pub fn unique_received(&self) -> usize {
        self.received_keys.len() - self.duplicate_keys.len()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicate_keys.len()
    }
}

/// Timeline of one DHT provider search within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtSearch {
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub found_providers: BTreeSet<String>,
}

impl DhtSearch {
    fn started(now: u64) -> Self {
        Self {
            started_at: now,
            finished_at: None,
            found_providers: BTreeSet::new(),
        }
    }
}

/// State of one block-retrieval session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Sequence number assigned by the node.
    pub id: u64,
    pub uuid: String,
    /// First key seen for the session, for display only.
    pub first_key: Option<String>,
    pub wanted_keys: HashSet<String>,
    pub received_keys: HashSet<String>,
    pub peers: BTreeMap<String, PeerStat>,
    /// Latest search per key.
    pub dht_searches: HashMap<String, DhtSearch>,
    pub incoming_advertised_count: u64,
    pub incoming_advertised_peers: HashSet<String>,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

impl Session {
    pub fn new(id: u64, uuid: impl Into<String>, first_key: Option<String>, now: u64) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            first_key,
            wanted_keys: HashSet::new(),
            received_keys: HashSet::new(),
            peers: BTreeMap::new(),
            dht_searches: HashMap::new(),
            incoming_advertised_count: 0,
            incoming_advertised_peers: HashSet::new(),
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Stamp completion. The first completion time is kept.
    pub fn complete(&mut self, now: u64) {
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }

    pub fn want(&mut self, key: &str) {
        self.wanted_keys.insert(key.to_string());
    }

    fn peer_mut(&mut self, peer: &str) -> &mut PeerStat {
        self.peers.entry(peer.to_string()).or_default()
    }

    /// Record that `peer` delivered `key`.
    ///
    /// The key counts as a duplicate for `peer` when any peer delivered it
    /// earlier in this session.
    pub fn record_receipt(&mut self, peer: &str, key: &str) {
        let already_received = self.received_keys.contains(key);
        let stat = self.peer_mut(peer);
        stat.received_keys.insert(key.to_string());
        if already_received {
            stat.duplicate_keys.insert(key.to_string());
        }
        self.received_keys.insert(key.to_string());
    }

    /// Open a search for `key`, replacing any earlier search for it.
    pub fn start_search(&mut self, key: &str, now: u64) {
        self.dht_searches.insert(key.to_string(), DhtSearch::started(now));
    }

    pub fn provider_found(&mut self, key: &str, provider: &str) {
        let stat = self.peer_mut(provider);
        stat.dht = true;
        stat.dht_error = false;
        if let Some(search) = self.dht_searches.get_mut(key) {
            search.found_providers.insert(provider.to_string());
        }
    }

    /// Flag a failed dial to a known peer. Unknown peers are ignored.
    pub fn provider_connect_error(&mut self, provider: &str) {
        if let Some(stat) = self.peers.get_mut(provider) {
            stat.dht_error = true;
        }
    }

    /// Stamp the end of the search for `key`. Returns false when there is no
    /// open search or it was already finished.
    pub fn finish_search(&mut self, key: &str, now: u64) -> bool {
        match self.dht_searches.get_mut(key) {
            Some(search) if search.finished_at.is_none() => {
                search.finished_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn record_advertisement(&mut self, peer: &str) {
        self.incoming_advertised_count += 1;
        self.incoming_advertised_peers.insert(peer.to_string());
    }
}

/// Owner of all sessions, addressed by UUID or by slot.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    by_uuid: HashMap<String, SessionSlot>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of the session for `uuid`, creating it if this is the first sight.
    pub fn get_or_create(
        &mut self,
        uuid: &str,
        id: u64,
        first_key: Option<&str>,
        now: u64,
    ) -> SessionSlot {
        if let Some(slot) = self.by_uuid.get(uuid) {
            return *slot;
        }
        let slot = self.sessions.len();
        self.sessions
            .push(Session::new(id, uuid, first_key.map(str::to_string), now));
        self.by_uuid.insert(uuid.to_string(), slot);
        debug!("New session {} ({}) in slot {}", id, uuid, slot);
        slot
    }

    pub fn slot_of(&self, uuid: &str) -> Option<SessionSlot> {
        self.by_uuid.get(uuid).copied()
    }

    pub fn get(&self, slot: SessionSlot) -> Option<&Session> {
        self.sessions.get(slot)
    }

    pub fn get_mut(&mut self, slot: SessionSlot) -> Option<&mut Session> {
        self.sessions.get_mut(slot)
    }

    pub fn find(&self, uuid: &str) -> Option<&Session> {
        self.slot_of(uuid).and_then(|slot| self.sessions.get(slot))
    }

    pub fn find_mut(&mut self, uuid: &str) -> Option<&mut Session> {
        let slot = self.slot_of(uuid)?;
        self.sessions.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Sessions that have not completed.
    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut().filter(|s| !s.is_completed())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Content key → slots of every session that wanted it.
#[derive(Debug, Default)]
pub struct KeyIndex {
    by_key: HashMap<String, BTreeSet<SessionSlot>>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str, slot: SessionSlot) {
        self.by_key.entry(key.to_string()).or_default().insert(slot);
    }

    /// Sessions interested in `key`, in creation order.
    pub fn sessions_for(&self, key: &str) -> Option<&BTreeSet<SessionSlot>> {
        self.by_key.get(key)
    }

    /// Forget `key` entirely. Nothing calls this during normal ingestion.
    pub fn remove(&mut self, key: &str) -> Option<BTreeSet<SessionSlot>> {
        self.by_key.remove(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_receipts() {
        let mut s = Session::new(1, "u1", Some("k1".into()), 0);
        s.record_receipt("A", "k1");
        s.record_receipt("B", "k1");

        assert_eq!(s.received_keys.len(), 1);
        let a = &s.peers["A"];
        let b = &s.peers["B"];
        assert_eq!((a.received_keys.len(), a.duplicates()), (1, 0));
        assert_eq!((b.received_keys.len(), b.duplicates()), (1, 1));
        assert_eq!(b.unique_received(), 0);
    }

    #[test]
    fn test_same_peer_twice_is_duplicate() {
        let mut s = Session::new(1, "u1", None, 0);
        s.record_receipt("A", "k1");
        s.record_receipt("A", "k1");
        assert_eq!(s.peers["A"].duplicates(), 1);
        assert_eq!(s.peers["A"].unique_received(), 0);
    }

    #[test]
    fn test_receipt_outside_want_set_accepted() {
        let mut s = Session::new(1, "u1", None, 0);
        s.want("k1");
        s.record_receipt("A", "k9");
        assert!(s.received_keys.contains("k9"));
        assert!(!s.wanted_keys.contains("k9"));
    }

    #[test]
    fn test_search_restart_replaces_timeline() {
        let mut s = Session::new(1, "u1", None, 0);
        s.start_search("k2", 100);
        s.provider_found("k2", "C");
        s.start_search("k2", 200);
        let search = &s.dht_searches["k2"];
        assert_eq!(search.started_at, 200);
        assert!(search.found_providers.is_empty());
        // The peer stat survives the restart.
        assert!(s.peers["C"].dht);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut s = Session::new(1, "u1", None, 0);
        assert!(!s.finish_search("k2", 50));
        s.start_search("k2", 100);
        assert!(s.finish_search("k2", 150));
        assert!(!s.finish_search("k2", 900));
        assert_eq!(s.dht_searches["k2"].finished_at, Some(150));
    }

    #[test]
    fn test_connect_error_only_for_known_peers() {
        let mut s = Session::new(1, "u1", None, 0);
        s.provider_connect_error("ghost");
        assert!(s.peers.is_empty());

        s.provider_found("k1", "C");
        s.provider_connect_error("C");
        assert!(s.peers["C"].dht_error);

        s.provider_found("k1", "C");
        assert!(!s.peers["C"].dht_error);
    }

    #[test]
    fn test_complete_keeps_first_stamp() {
        let mut s = Session::new(1, "u1", None, 0);
        s.complete(10);
        s.complete(20);
        assert_eq!(s.completed_at, Some(10));
    }

    #[test]
    fn test_registry_get_or_create() {
        let mut reg = SessionRegistry::new();
        let a = reg.get_or_create("u1", 1, Some("k1"), 5);
        let b = reg.get_or_create("u1", 1, Some("other"), 9);
        let c = reg.get_or_create("u2", 2, None, 9);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.len(), 2);
        let s = reg.find("u1").unwrap();
        assert_eq!(s.first_key.as_deref(), Some("k1"));
        assert_eq!(s.created_at, 5);
        assert!(reg.find("missing").is_none());
    }

    #[test]
    fn test_active_mut_skips_completed() {
        let mut reg = SessionRegistry::new();
        reg.get_or_create("u1", 1, None, 0);
        let done = reg.get_or_create("u2", 2, None, 0);
        reg.get_mut(done).unwrap().complete(1);
        let active: Vec<String> = reg.active_mut().map(|s| s.uuid.clone()).collect();
        assert_eq!(active, vec!["u1"]);
    }

    #[test]
    fn test_key_index_fan_out() {
        let mut idx = KeyIndex::new();
        idx.register("k1", 0);
        idx.register("k1", 3);
        idx.register("k1", 0);
        idx.register("k2", 3);
        let slots: Vec<_> = idx.sessions_for("k1").unwrap().iter().copied().collect();
        assert_eq!(slots, vec![0, 3]);
        assert!(idx.sessions_for("k9").is_none());
        assert_eq!(idx.len(), 2);
        assert!(idx.remove("k2").is_some());
        assert_eq!(idx.len(), 1);
    }
}
