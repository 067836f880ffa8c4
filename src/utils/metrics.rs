//! Global pipeline counters.
//!
//! Plain atomics for the per-frame counters the reader and workers bump on
//! the hot path, plus a short-lived mutex around the per-application
//! aggregation map. One invariant holds at the end of every run:
//! `total_packets == forwarded + dropped + filtered`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::types::AppTag;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    total_packets: AtomicU64,
    total_bytes: AtomicU64,
    tcp_packets: AtomicU64,
    udp_packets: AtomicU64,
    filtered: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    apps: Mutex<AppBreakdown>,
}

#[derive(Debug, Default)]
struct AppBreakdown {
    counts: HashMap<AppTag, u64>,
    detected_names: HashMap<String, AppTag>,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub filtered: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub app_counts: Vec<(AppTag, u64)>,
    pub detected_names: Vec<(String, AppTag)>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One frame read from the capture, before any filtering.
    pub fn record_frame(&self, bytes: usize) {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A frame the reader discarded (undecodable, non-IPv4, non-TCP/UDP).
    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tcp(&self) {
        self.tcp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_udp(&self) {
        self.udp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Per-work-item application accounting; names map to the tag they
    /// most recently classified as.
    pub fn record_app(&self, app: AppTag, name: &str) {
        let mut apps = self.apps.lock();
        *apps.counts.entry(app).or_insert(0) += 1;
        if !name.is_empty() {
            apps.detected_names.insert(name.to_string(), app);
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let apps = self.apps.lock();
        let mut app_counts: Vec<_> = apps.counts.iter().map(|(k, v)| (*k, *v)).collect();
        app_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
        let mut detected_names: Vec<_> = apps
            .detected_names
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        detected_names.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            total_packets: self.total_packets.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            app_counts,
            detected_names,
        }
    }
}

impl MetricsSnapshot {
    /// The counter identity every finished run must satisfy.
    pub fn reconciles(&self) -> bool {
        self.total_packets == self.forwarded + self.dropped + self.filtered
    }
}
