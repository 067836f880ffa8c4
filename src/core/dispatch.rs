//! Load-balancer stage.
//!
//! Each dispatcher owns one bounded input queue and a fixed slice of
//! worker queues. Routing is `flow_hash % slice_len`, so every frame of a
//! tuple lands on the same worker and per-flow FIFO order is preserved.
//! Dispatchers never look at payload bytes.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::core::packet::WorkItem;
use crate::core::types::flow_hash;
use crate::core::QUEUE_POLL;

pub struct Dispatcher {
    id: usize,
    first_worker: usize,
    input: Receiver<WorkItem>,
    workers: Vec<Sender<WorkItem>>,
    received: u64,
    dispatched: u64,
    per_worker: Vec<u64>,
}

/// Final counters returned when a dispatcher thread exits.
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    pub id: usize,
    pub first_worker: usize,
    pub received: u64,
    pub dispatched: u64,
    pub per_worker: Vec<u64>,
}

impl Dispatcher {
    /// `first_worker` is the global index of the first worker in this
    /// dispatcher's slice, used only for reporting.
    pub fn new(
        id: usize,
        first_worker: usize,
        input: Receiver<WorkItem>,
        workers: Vec<Sender<WorkItem>>,
    ) -> Self {
        let slots = workers.len();
        Self {
            id,
            first_worker,
            input,
            workers,
            received: 0,
            dispatched: 0,
            per_worker: vec![0; slots],
        }
    }

    /// Drain the input queue until it is shut down and empty, then return
    /// the counters. Dropping `self` releases the worker senders, which is
    /// what lets the workers drain out in turn.
    pub fn run(mut self) -> DispatcherStats {
        debug!(
            "lb{} started (serving fp{}-fp{})",
            self.id,
            self.first_worker,
            self.first_worker + self.workers.len() - 1
        );

        loop {
            match self.input.recv_timeout(QUEUE_POLL) {
                Ok(item) => {
                    self.received += 1;
                    let idx = (flow_hash(&item.tuple) % self.workers.len() as u64) as usize;
                    // A send only fails once the worker is gone, which the
                    // shutdown order rules out while items still flow; the
                    // item is dropped either way.
                    if self.workers[idx].send(item).is_ok() {
                        self.dispatched += 1;
                        self.per_worker[idx] += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("lb{} stopped ({} dispatched)", self.id, self.dispatched);
        DispatcherStats {
            id: self.id,
            first_worker: self.first_worker,
            received: self.received,
            dispatched: self.dispatched,
            per_worker: self.per_worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::{decode, testutil::tcp_frame, WorkItem};
    use crossbeam_channel::bounded;

    fn item(id: u64, src_port: u16) -> WorkItem {
        let frame = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], src_port, 443, 0x02, b"");
        let decoded = decode(&frame).unwrap();
        WorkItem::new(id, 0, 0, frame, decoded)
    }

    #[test]
    fn same_tuple_always_reaches_same_worker() {
        let (in_tx, in_rx) = bounded(64);
        let (a_tx, a_rx) = bounded(64);
        let (b_tx, b_rx) = bounded(64);
        let dispatcher = Dispatcher::new(0, 0, in_rx, vec![a_tx, b_tx]);

        for i in 0..10 {
            in_tx.send(item(i, 40_000)).unwrap();
        }
        for i in 0..10 {
            in_tx.send(item(100 + i, 40_001)).unwrap();
        }
        drop(in_tx);
        let stats = dispatcher.run();

        assert_eq!(stats.received, 20);
        assert_eq!(stats.dispatched, 20);
        let a: Vec<_> = a_rx.try_iter().collect();
        let b: Vec<_> = b_rx.try_iter().collect();
        assert_eq!(a.len() + b.len(), 20);

        // Every tuple's frames landed in exactly one bucket, in FIFO order.
        let mut owner: std::collections::HashMap<u16, usize> = std::collections::HashMap::new();
        let mut last_id: std::collections::HashMap<u16, u64> = std::collections::HashMap::new();
        for (bucket_idx, bucket) in [&a, &b].into_iter().enumerate() {
            for item in bucket {
                let port = item.tuple.src_port;
                assert_eq!(*owner.entry(port).or_insert(bucket_idx), bucket_idx);
                if let Some(prev) = last_id.insert(port, item.id) {
                    assert!(item.id > prev);
                }
            }
        }
        assert_eq!(stats.per_worker.iter().sum::<u64>(), 20);
    }
}
