//! Per-worker flow tracking.
//!
//! Each fast-path worker owns one `FlowTable` outright: the hash dispatch
//! guarantees every frame of a tuple lands on the same worker, so the
//! table needs no locking. Both directions of a session are separate flows
//! by design; only the client-to-server direction carries the payloads the
//! sniffers care about.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::packet::tcp_flags;
use crate::core::types::{AppTag, FiveTuple};

/// Aggregate lifecycle state of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    New,
    Established,
    Classified,
    Blocked,
    Closed,
}

/// State kept per directed flow.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub tuple: FiveTuple,
    pub state: FlowState,
    pub app: AppTag,
    pub server_name: String,
    pub classified: bool,
    pub blocked: bool,
    pub packets: u64,
    pub bytes: u64,
    pub syn_seen: bool,
    pub syn_ack_seen: bool,
    pub fin_seen: bool,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

impl FlowRecord {
    fn new(tuple: FiveTuple, now: Instant) -> Self {
        Self {
            tuple,
            state: FlowState::New,
            app: AppTag::Unknown,
            server_name: String::new(),
            classified: false,
            blocked: false,
            packets: 0,
            bytes: 0,
            syn_seen: false,
            syn_ack_seen: false,
            fin_seen: false,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Record a sniffer result. First success wins: once classified, the
    /// tag and name never change (no downgrades). A port-based guess is
    /// not a classification and is applied directly to `app` instead.
    pub fn classify(&mut self, app: AppTag, name: &str) {
        if self.classified {
            return;
        }
        self.app = app;
        self.server_name = name.to_string();
        self.classified = true;
        if !matches!(self.state, FlowState::Blocked | FlowState::Closed) {
            self.state = FlowState::Classified;
        }
    }

    /// Mark the flow blocked. Sticks for the rest of its lifetime.
    pub fn block(&mut self) {
        self.blocked = true;
        self.state = FlowState::Blocked;
    }

    /// Fold one TCP flag byte into the handshake substate.
    pub fn update_tcp(&mut self, flags: u8) {
        if flags & tcp_flags::SYN != 0 {
            if flags & tcp_flags::ACK != 0 {
                self.syn_ack_seen = true;
            } else {
                self.syn_seen = true;
            }
        }

        if self.syn_seen
            && self.syn_ack_seen
            && flags & tcp_flags::ACK != 0
            && self.state == FlowState::New
        {
            self.state = FlowState::Established;
        }

        if flags & tcp_flags::FIN != 0 {
            self.fin_seen = true;
        }
        if flags & tcp_flags::RST != 0 {
            self.state = FlowState::Closed;
        }
        if self.fin_seen && flags & tcp_flags::ACK != 0 {
            self.state = FlowState::Closed;
        }
    }
}

/// Tuple-keyed flow map with a capacity ceiling and idle sweeping.
#[derive(Debug)]
pub struct FlowTable {
    flows: HashMap<FiveTuple, FlowRecord>,
    max_flows: usize,
    total_seen: u64,
}

impl FlowTable {
    pub fn new(max_flows: usize) -> Self {
        Self {
            flows: HashMap::new(),
            max_flows: max_flows.max(1),
            total_seen: 0,
        }
    }

    /// Fetch the flow for a tuple, creating it on first sighting. At
    /// capacity the entry with the oldest `last_seen` is evicted first.
    pub fn get_or_create(&mut self, tuple: FiveTuple, now: Instant) -> &mut FlowRecord {
        if !self.flows.contains_key(&tuple) {
            if self.flows.len() >= self.max_flows {
                self.evict_oldest();
            }
            self.total_seen += 1;
        }
        self.flows
            .entry(tuple)
            .or_insert_with(|| FlowRecord::new(tuple, now))
    }

    /// Bump counters and the recency stamp for one frame.
    pub fn touch(record: &mut FlowRecord, frame_len: usize, now: Instant) {
        record.last_seen = now;
        record.packets += 1;
        record.bytes += frame_len as u64;
    }

    /// Drop flows idle past the threshold or already closed. Returns how
    /// many were removed.
    pub fn sweep_stale(&mut self, idle: Duration, now: Instant) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, record| {
            record.state != FlowState::Closed && now.duration_since(record.last_seen) <= idle
        });
        before - self.flows.len()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Flows created over the table's lifetime, evicted ones included.
    pub fn total_seen(&self) -> u64 {
        self.total_seen
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowRecord> {
        self.flows.values()
    }

    /// Owned copies of all live records, for the post-shutdown report.
    pub fn snapshot(&self) -> Vec<FlowRecord> {
        self.flows.values().cloned().collect()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .flows
            .iter()
            .min_by_key(|(_, record)| record.last_seen)
            .map(|(tuple, _)| *tuple);
        if let Some(tuple) = oldest {
            self.flows.remove(&tuple);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PROTO_TCP;

    fn tuple(src_port: u16) -> FiveTuple {
        FiveTuple {
            src_ip: 0x0a00_0001,
            dst_ip: 0x0a00_0002,
            src_port,
            dst_port: 443,
            protocol: PROTO_TCP,
        }
    }

    #[test]
    fn create_then_touch_accumulates() {
        let mut table = FlowTable::new(10);
        let now = Instant::now();
        let record = table.get_or_create(tuple(1), now);
        assert_eq!(record.state, FlowState::New);
        FlowTable::touch(record, 100, now);
        FlowTable::touch(record, 60, now);
        assert_eq!(record.packets, 2);
        assert_eq!(record.bytes, 160);
        assert_eq!(table.len(), 1);
        assert_eq!(table.total_seen(), 1);
    }

    #[test]
    fn classify_is_set_once() {
        let mut table = FlowTable::new(10);
        let record = table.get_or_create(tuple(1), Instant::now());
        record.app = AppTag::Https; // port-based guess
        assert!(!record.classified);

        record.classify(AppTag::YouTube, "www.youtube.com");
        assert!(record.classified);
        assert_eq!(record.state, FlowState::Classified);

        // A later sniff never downgrades.
        record.classify(AppTag::Google, "other.google.com");
        assert_eq!(record.app, AppTag::YouTube);
        assert_eq!(record.server_name, "www.youtube.com");
    }

    #[test]
    fn block_sticks() {
        let mut table = FlowTable::new(10);
        let record = table.get_or_create(tuple(1), Instant::now());
        record.block();
        assert!(record.blocked);
        assert_eq!(record.state, FlowState::Blocked);
        record.classify(AppTag::Netflix, "netflix.com");
        assert!(record.blocked);
        assert_eq!(record.state, FlowState::Blocked);
    }

    #[test]
    fn capacity_evicts_oldest_last_seen() {
        let mut table = FlowTable::new(2);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        let t2 = t0 + Duration::from_secs(2);

        table.get_or_create(tuple(1), t0);
        table.get_or_create(tuple(2), t1);
        table.get_or_create(tuple(3), t2); // evicts tuple(1)

        assert_eq!(table.len(), 2);
        assert!(table.iter().all(|r| r.tuple.src_port != 1));
        assert_eq!(table.total_seen(), 3);
    }

    #[test]
    fn sweep_removes_idle_and_closed() {
        let mut table = FlowTable::new(10);
        let t0 = Instant::now();
        table.get_or_create(tuple(1), t0);
        let closed = table.get_or_create(tuple(2), t0);
        closed.state = FlowState::Closed;
        let fresh = t0 + Duration::from_secs(400);
        table.get_or_create(tuple(3), fresh);

        let removed = table.sweep_stale(Duration::from_secs(300), fresh);
        assert_eq!(removed, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn tcp_handshake_walks_to_established_and_closed() {
        let mut table = FlowTable::new(10);
        let record = table.get_or_create(tuple(1), Instant::now());

        record.update_tcp(tcp_flags::SYN);
        assert!(record.syn_seen && !record.syn_ack_seen);
        record.update_tcp(tcp_flags::SYN | tcp_flags::ACK);
        assert!(record.syn_ack_seen);
        record.update_tcp(tcp_flags::ACK);
        assert_eq!(record.state, FlowState::Established);

        record.update_tcp(tcp_flags::FIN | tcp_flags::ACK);
        assert_eq!(record.state, FlowState::Closed);
    }

    #[test]
    fn rst_closes_immediately() {
        let mut table = FlowTable::new(10);
        let record = table.get_or_create(tuple(1), Instant::now());
        record.update_tcp(tcp_flags::RST);
        assert_eq!(record.state, FlowState::Closed);
    }
}
