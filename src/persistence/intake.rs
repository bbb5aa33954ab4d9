//! Intake queue
//! Mission: The sole boundary between ingest and persistence. Bounded,
//! drop-oldest, and cheap to push from many concurrent ingest sessions
//! without blocking them on a slow writer.
//!
//! `tokio::sync::mpsc` does not offer drop-oldest backpressure (a full
//! channel blocks or errors the sender), so this is a plain
//! `VecDeque` behind a `parking_lot::Mutex`, paired with a `Notify` the
//! aggregator waits on.

use crate::models::{Sample, ServerIdentity};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

pub struct QueuedSample {
    pub identity: ServerIdentity,
    pub sample: Sample,
}

pub struct IntakeQueue {
    capacity: usize,
    queue: Mutex<VecDeque<QueuedSample>>,
    notify: Notify,
    overflow_total: AtomicU64,
}

impl IntakeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            overflow_total: AtomicU64::new(0),
        }
    }

    /// Pushes a sample, dropping the oldest queued entry if at capacity.
    /// Never blocks the caller.
    pub fn push(&self, identity: ServerIdentity, sample: Sample) {
        let mut dropped = false;
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                dropped = true;
            }
            queue.push_back(QueuedSample { identity, sample });
        }
        if dropped {
            self.overflow_total.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    /// Drains up to `max` queued samples in FIFO order. Returns an empty
    /// vec immediately if nothing is queued; callers that want to block
    /// until something arrives should await `notified()` first.
    pub fn drain(&self, max: usize) -> Vec<QueuedSample> {
        let mut queue = self.queue.lock();
        let n = queue.len().min(max);
        queue.drain(..n).collect()
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overflow_total(&self) -> u64 {
        self.overflow_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cpu, Host, Load, Memory, Network, Sample};
    use chrono::Utc;

    fn sample() -> Sample {
        Sample {
            timestamp: Utc::now(),
            cpu: Cpu {
                brand: "t".into(),
                core_count: 1,
                usage_percent: 1.0,
                per_core_percent: vec![],
                frequency_mhz: 1000,
            },
            memory: Memory {
                total_bytes: 1,
                used_bytes: 0,
                available_bytes: 1,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
                used_percent: 0.0,
            },
            disks: vec![],
            network: Network::default(),
            load: Load {
                one: 0.0,
                five: 0.0,
                fifteen: 0.0,
            },
            host: Host {
                hostname: "h".into(),
                os_name: "linux".into(),
                os_version: "1".into(),
                kernel_version: "1".into(),
                arch: "x86_64".into(),
                uptime_secs: 1,
            },
            gpu: vec![],
            ping: vec![],
        }
    }

    #[test]
    fn push_past_capacity_drops_oldest() {
        let q = IntakeQueue::new(2);
        q.push(ServerIdentity::from("a"), sample());
        q.push(ServerIdentity::from("b"), sample());
        q.push(ServerIdentity::from("c"), sample());
        assert_eq!(q.len(), 2);
        assert_eq!(q.overflow_total(), 1);
        let drained = q.drain(10);
        assert_eq!(drained[0].identity, ServerIdentity::from("b"));
        assert_eq!(drained[1].identity, ServerIdentity::from("c"));
    }

    #[test]
    fn drain_respects_max() {
        let q = IntakeQueue::new(10);
        for _ in 0..5 {
            q.push(ServerIdentity::from("a"), sample());
        }
        let drained = q.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(q.len(), 3);
    }
}
