//! Retention sweeper
//! Mission: Periodically delete buckets that have aged out of their
//! resolution's retention window, one transaction per resolution.

use super::buckets::Resolution;
use super::writer::Writer;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RetentionSweeper {
    writer: Arc<Writer>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(writer: Arc<Writer>, interval: Duration) -> Self {
        Self { writer, interval }
    }

    fn sweep_once(&self) {
        let now = Utc::now().timestamp();
        for resolution in Resolution::ALL {
            let cutoff = now - resolution.retention_secs();
            match self.writer.delete_older_than(resolution, cutoff) {
                Ok(deleted) if deleted > 0 => {
                    info!(?resolution, deleted, "retention sweep pruned expired buckets");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(?resolution, error = %err, "retention sweep failed");
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => self.sweep_once(),
            }
        }
    }
}
