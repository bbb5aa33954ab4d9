//! Persistence Pipeline
//! Mission: Turn the unbounded stream of live samples into five
//! fixed-resolution rollups on disk, surviving process restarts without
//! losing more than the bucket currently open at crash time.

pub mod aggregator;
pub mod buckets;
pub mod intake;
pub mod retention;
pub mod writer;

pub use aggregator::Aggregator;
pub use buckets::{Bucket, PingBucket, Resolution};
pub use intake::IntakeQueue;
pub use retention::RetentionSweeper;
pub use writer::Writer;

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters named in the error-handling design: visible via the admin
/// API, not wired to any metrics exporter.
#[derive(Debug, Default)]
pub struct PersistenceMetrics {
    pub intake_overflow_total: AtomicU64,
    pub write_failure_total: AtomicU64,
    pub samples_persisted_total: AtomicU64,
}

impl PersistenceMetrics {
    pub fn snapshot(&self) -> PersistenceMetricsSnapshot {
        PersistenceMetricsSnapshot {
            intake_overflow_total: self.intake_overflow_total.load(Ordering::Relaxed),
            write_failure_total: self.write_failure_total.load(Ordering::Relaxed),
            samples_persisted_total: self.samples_persisted_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PersistenceMetricsSnapshot {
    pub intake_overflow_total: u64,
    pub write_failure_total: u64,
    pub samples_persisted_total: u64,
}
