//! Fast-path worker.
//!
//! A worker drains its own bounded queue, owns its flow table outright,
//! runs the sniffers on first-payload segments, and turns rule verdicts
//! into forward/drop decisions. Idle periods (queue timeouts) are spent
//! sweeping stale flows so unbounded inputs do not grow the table forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::core::flow::{FlowRecord, FlowTable};
use crate::core::packet::WorkItem;
use crate::core::types::{map_name_to_app, AppTag};
use crate::core::QUEUE_POLL;
use crate::protocols::{dns, http, tls};
use crate::rules::RuleSet;
use crate::utils::metrics::EngineMetrics;

const DNS_PORT: u16 = 53;
const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// Minimum payload sizes worth handing to a sniffer.
const MIN_TLS_PAYLOAD: usize = 5;
const MIN_HTTP_PAYLOAD: usize = 10;

pub struct Worker {
    id: usize,
    input: Receiver<WorkItem>,
    output: Sender<WorkItem>,
    rules: Arc<RuleSet>,
    metrics: Arc<EngineMetrics>,
    flows: FlowTable,
    idle_timeout: Duration,
    processed: u64,
    forwarded: u64,
    dropped: u64,
}

/// Final per-worker accounting, including a snapshot of the live flows for
/// cross-worker aggregation after shutdown.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub id: usize,
    pub processed: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub flows_live: usize,
    pub flows_seen: u64,
    pub flows: Vec<FlowRecord>,
}

impl Worker {
    pub fn new(
        id: usize,
        input: Receiver<WorkItem>,
        output: Sender<WorkItem>,
        rules: Arc<RuleSet>,
        metrics: Arc<EngineMetrics>,
        max_flows: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            id,
            input,
            output,
            rules,
            metrics,
            flows: FlowTable::new(max_flows),
            idle_timeout,
            processed: 0,
            forwarded: 0,
            dropped: 0,
        }
    }

    /// Process until the input queue is shut down and drained. Returning
    /// drops this worker's output sender, which lets the writer finish.
    pub fn run(mut self) -> WorkerReport {
        debug!("fp{} started", self.id);

        loop {
            match self.input.recv_timeout(QUEUE_POLL) {
                Ok(item) => self.process(item),
                Err(RecvTimeoutError::Timeout) => {
                    self.flows.sweep_stale(self.idle_timeout, Instant::now());
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("fp{} stopped ({} processed)", self.id, self.processed);
        WorkerReport {
            id: self.id,
            processed: self.processed,
            forwarded: self.forwarded,
            dropped: self.dropped,
            flows_live: self.flows.len(),
            flows_seen: self.flows.total_seen(),
            flows: self.flows.snapshot(),
        }
    }

    fn process(&mut self, item: WorkItem) {
        self.processed += 1;
        let now = Instant::now();

        let flow = self.flows.get_or_create(item.tuple, now);
        FlowTable::touch(flow, item.data.len(), now);

        if item.is_tcp() {
            flow.update_tcp(item.tcp_flags);
        }

        // A blocked flow stays blocked: no re-classification, no rule
        // re-evaluation, every frame drops.
        if flow.blocked {
            self.metrics.record_app(flow.app, &flow.server_name);
            self.metrics.record_dropped();
            self.dropped += 1;
            return;
        }

        if !flow.classified && item.payload_length > 0 {
            classify(flow, &item);
        }

        self.metrics.record_app(flow.app, &flow.server_name);

        let verdict = self.rules.should_block(
            item.tuple.src_ip,
            item.tuple.dst_port,
            flow.app,
            &flow.server_name,
        );

        if let Some(reason) = verdict {
            flow.block();
            debug!("fp{}: blocked {} ({})", self.id, reason, item.tuple);
            self.metrics.record_dropped();
            self.dropped += 1;
            return;
        }

        match self.output.send(item) {
            Ok(()) => {
                self.metrics.record_forwarded();
                self.forwarded += 1;
            }
            Err(_) => {
                // Output queue already shut down; the item is dropped.
                self.metrics.record_dropped();
                self.dropped += 1;
            }
        }
    }
}

/// Run the sniffers appropriate for this segment, stopping at the first
/// success. Failures of any kind mean "no signal" and fall through.
fn classify(flow: &mut FlowRecord, item: &WorkItem) {
    let payload = item.payload();
    let tuple = &item.tuple;

    if tuple.dst_port == HTTPS_PORT && item.payload_length > MIN_TLS_PAYLOAD {
        if let Some(sni) = tls::extract_sni(payload) {
            flow.classify(map_name_to_app(&sni), &sni);
            return;
        }
    }

    if tuple.dst_port == HTTP_PORT && item.payload_length > MIN_HTTP_PAYLOAD {
        if let Some(host) = http::extract_host(payload) {
            flow.classify(map_name_to_app(&host), &host);
            return;
        }
    }

    if tuple.dst_port == DNS_PORT || tuple.src_port == DNS_PORT {
        if let Some(query) = dns::extract_query(payload) {
            flow.classify(AppTag::Dns, &query);
            return;
        }
    }

    // Port-based guess only; `classified` stays false so a later
    // ClientHello can still upgrade the tag.
    if flow.app == AppTag::Unknown {
        match tuple.dst_port {
            HTTPS_PORT => flow.app = AppTag::Https,
            HTTP_PORT => flow.app = AppTag::Http,
            _ => {}
        }
    }
}
