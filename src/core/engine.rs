//! Pipeline assembly and the reader/writer ends.
//!
//! Thread layout: the calling thread reads the capture, L dispatcher
//! threads route by tuple hash, L*W workers classify and filter, one
//! writer serialises the output. Every hop is a bounded channel; shutdown
//! is sender-drop, which tears the stages down strictly in the order
//! dispatchers, workers, writer — no queue closes while an upstream
//! producer still holds items for it.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::bounded;
use tracing::{info, warn};

use crate::capture::pcap::{PcapReader, PcapWriter, LINKTYPE_ETHERNET};
use crate::capture::CaptureError;
use crate::config::SieveConfig;
use crate::core::dispatch::{Dispatcher, DispatcherStats};
use crate::core::packet::{decode, WorkItem};
use crate::core::types::{flow_hash, PROTO_TCP};
use crate::core::worker::{Worker, WorkerReport};
use crate::rules::RuleSet;
use crate::utils::metrics::{EngineMetrics, MetricsSnapshot};

/// Everything a finished run reports: reconciled counters, per-stage
/// breakdowns, and the workers' flow snapshots.
#[derive(Debug)]
pub struct EngineReport {
    pub metrics: MetricsSnapshot,
    pub dispatchers: Vec<DispatcherStats>,
    pub workers: Vec<WorkerReport>,
    pub frames_written: u64,
    pub elapsed: Duration,
}

pub struct Engine {
    config: SieveConfig,
    rules: Arc<RuleSet>,
    metrics: Arc<EngineMetrics>,
}

impl Engine {
    pub fn new(config: SieveConfig, rules: Arc<RuleSet>) -> Self {
        Self {
            config,
            rules,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run the whole pipeline over one capture. Structural input failures
    /// (open, magic, short header) surface here before any thread starts.
    pub fn run<P: AsRef<Path>>(&self, input: P, output: P) -> Result<EngineReport> {
        let started = Instant::now();

        let mut reader = PcapReader::open(input.as_ref())
            .context("failed to open input capture")?;
        if reader.header().network != LINKTYPE_ETHERNET {
            warn!(
                "input link type {} is not Ethernet; frames will not decode",
                reader.header().network
            );
        }
        let writer = PcapWriter::create(output.as_ref(), reader.raw_header(), reader.is_swapped())
            .context("failed to open output capture")?;

        let lbs = self.config.engine.lbs;
        let fps_per_lb = self.config.engine.fps_per_lb;
        let queue_capacity = self.config.engine.queue_capacity;
        let total_fps = lbs * fps_per_lb;
        let max_flows = self.config.flow.max_flows;
        let idle_timeout = Duration::from_secs(self.config.flow.idle_timeout_secs);

        info!(
            "engine starting: {lbs} dispatchers, {fps_per_lb} workers each ({total_fps} total), \
             queue capacity {queue_capacity}"
        );

        // Output hop: workers -> writer.
        let (out_tx, out_rx) = bounded::<WorkItem>(queue_capacity);
        let writer_handle = thread::Builder::new()
            .name("writer".into())
            .spawn(move || -> Result<u64, CaptureError> {
                let mut written = 0u64;
                while let Ok(item) = out_rx.recv() {
                    writer.write_frame(item.ts_sec, item.ts_usec, &item.data)?;
                    written += 1;
                }
                writer.flush()?;
                Ok(written)
            })
            .context("failed to spawn writer thread")?;

        // Worker hop: dispatchers -> workers. Each worker keeps one clone
        // of the output sender; the engine's own clone is dropped so the
        // writer exits exactly when the last worker does.
        let mut worker_txs = Vec::with_capacity(total_fps);
        let mut worker_handles = Vec::with_capacity(total_fps);
        for wid in 0..total_fps {
            let (tx, rx) = bounded::<WorkItem>(queue_capacity);
            let worker = Worker::new(
                wid,
                rx,
                out_tx.clone(),
                Arc::clone(&self.rules),
                Arc::clone(&self.metrics),
                max_flows,
                idle_timeout,
            );
            let handle = thread::Builder::new()
                .name(format!("fp-{wid}"))
                .spawn(move || worker.run())
                .context("failed to spawn worker thread")?;
            worker_txs.push(tx);
            worker_handles.push(handle);
        }
        drop(out_tx);

        // Dispatch hop: reader -> dispatchers. Worker senders are moved
        // into their owning dispatcher, so a dispatcher exiting is what
        // shuts its workers' queues.
        let mut worker_txs = worker_txs.into_iter();
        let mut lb_txs = Vec::with_capacity(lbs);
        let mut lb_handles = Vec::with_capacity(lbs);
        for lb_id in 0..lbs {
            let slice: Vec<_> = worker_txs.by_ref().take(fps_per_lb).collect();
            let (tx, rx) = bounded::<WorkItem>(queue_capacity);
            let dispatcher = Dispatcher::new(lb_id, lb_id * fps_per_lb, rx, slice);
            let handle = thread::Builder::new()
                .name(format!("lb-{lb_id}"))
                .spawn(move || dispatcher.run())
                .context("failed to spawn dispatcher thread")?;
            lb_txs.push(tx);
            lb_handles.push(handle);
        }

        // Read and dispatch on this thread. Bounded sends throttle the
        // reader whenever the workers fall behind.
        let mut next_id = 0u64;
        loop {
            match reader.read_next() {
                Ok(Some(frame)) => {
                    self.metrics.record_frame(frame.data.len());
                    let Some(decoded) = decode(&frame.data) else {
                        self.metrics.record_filtered();
                        continue;
                    };
                    if decoded.tuple.protocol == PROTO_TCP {
                        self.metrics.record_tcp();
                    } else {
                        self.metrics.record_udp();
                    }

                    let item =
                        WorkItem::new(next_id, frame.ts_sec, frame.ts_usec, frame.data, decoded);
                    next_id += 1;

                    let idx = (flow_hash(&item.tuple) % lbs as u64) as usize;
                    if lb_txs[idx].send(item).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("capture read error, stopping input: {e}");
                    break;
                }
            }
        }
        info!(
            "reader finished: {} frames read, {} dispatched",
            self.metrics.total_packets(),
            next_id
        );

        // Quiesce: dispatchers first, then workers, then the writer.
        drop(lb_txs);
        let mut dispatchers: Vec<DispatcherStats> = Vec::with_capacity(lbs);
        for handle in lb_handles {
            dispatchers.push(
                handle
                    .join()
                    .map_err(|_| anyhow!("dispatcher thread panicked"))?,
            );
        }
        let mut workers: Vec<WorkerReport> = Vec::with_capacity(total_fps);
        for handle in worker_handles {
            workers.push(handle.join().map_err(|_| anyhow!("worker thread panicked"))?);
        }
        let frames_written = writer_handle
            .join()
            .map_err(|_| anyhow!("writer thread panicked"))?
            .context("failed to finalise output capture")?;

        dispatchers.sort_by_key(|s| s.id);
        workers.sort_by_key(|w| w.id);

        Ok(EngineReport {
            metrics: self.metrics.snapshot(),
            dispatchers,
            workers,
            frames_written,
            elapsed: started.elapsed(),
        })
    }
}

impl EngineReport {
    /// Emit the end-of-run operator summary.
    pub fn log_summary(&self) {
        let m = &self.metrics;
        info!(
            "processed {} frames ({} bytes) in {:.2?}: {} forwarded, {} dropped, {} filtered",
            m.total_packets, m.total_bytes, self.elapsed, m.forwarded, m.dropped, m.filtered
        );
        info!(
            "transport mix: {} tcp, {} udp; {} frames written",
            m.tcp_packets, m.udp_packets, self.frames_written
        );
        for lb in &self.dispatchers {
            info!(
                "lb{}: received {}, dispatched {} (per-fp {:?})",
                lb.id, lb.received, lb.dispatched, lb.per_worker
            );
        }
        for fp in &self.workers {
            info!(
                "fp{}: processed {}, forwarded {}, dropped {}, {} live flows ({} seen)",
                fp.id, fp.processed, fp.forwarded, fp.dropped, fp.flows_live, fp.flows_seen
            );
        }
        let classified: u64 = self
            .workers
            .iter()
            .flat_map(|w| w.flows.iter())
            .filter(|f| f.classified)
            .count() as u64;
        info!("application breakdown ({classified} classified flows live):");
        for (app, count) in &m.app_counts {
            info!("  {app:<12} {count}");
        }
        for (name, app) in &m.detected_names {
            info!("  detected {name} -> {app}");
        }
    }
}
