//! Live State Store
//! Mission: The authoritative in-memory view of "what is the current
//! state of every known server", sharded for concurrent agent writes,
//! cheap to snapshot for a newly connecting dashboard.

use crate::models::{LiveEntry, PresenceFlag, ServerDescriptor, ServerIdentity};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const SHARD_COUNT: usize = 16;

/// Kind of mutation a `ChangeEvent` reports. The fan-out engine uses
/// this only to decide whether a full resend is warranted; today every
/// kind just marks the identity dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    SampleApplied,
    PresenceChanged,
    DescriptorChanged,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub identity: ServerIdentity,
    pub kind: ChangeKind,
    pub seq: u64,
}

fn shard_for(identity: &ServerIdentity) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    identity.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

struct Shard {
    entries: Mutex<HashMap<ServerIdentity, LiveEntry>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

/// Sharded, lock-protected map of every known identity to its current
/// `LiveEntry`, plus a broadcast channel of `ChangeEvent`s for
/// subscribers that want to react rather than poll.
pub struct LiveStateStore {
    shards: Vec<Shard>,
    seq: AtomicU64,
    changes: broadcast::Sender<ChangeEvent>,
    presence_window: Duration,
}

impl LiveStateStore {
    pub fn new(presence_window: Duration) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            shards: (0..SHARD_COUNT).map(|_| Shard::new()).collect(),
            seq: AtomicU64::new(0),
            changes: tx,
            presence_window,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, identity: ServerIdentity, kind: ChangeKind, seq: u64) {
        // No subscribers is the common case between dashboard
        // connections; broadcast::send returning an error just means
        // that, not a failure.
        let _ = self.changes.send(ChangeEvent { identity, kind, seq });
    }

    /// Subscribe to the raw change stream. Callers that fall behind see
    /// `RecvError::Lagged` and should resubscribe plus re-snapshot
    /// rather than try to catch up event-by-event.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Applies a freshly decoded sample for `identity`, marking it
    /// present. Creates the entry if this is the first sample seen.
    /// Derives the instantaneous network rate from the delta against the
    /// previous sample for this identity: a decreasing counter (reboot
    /// or wrap) or a gap under 100ms is treated as "no rate available"
    /// rather than risk a wildly inflated instantaneous figure.
    pub fn apply_sample(&self, identity: ServerIdentity, mut sample: crate::models::Sample) {
        let shard = &self.shards[shard_for(&identity)];
        let seq = self.next_seq();
        let now = Utc::now();
        let was_online = {
            let mut entries = shard.entries.lock();
            let existed = entries.contains_key(&identity);
            let entry = entries
                .entry(identity.clone())
                .or_insert_with(|| LiveEntry {
                    identity: identity.clone(),
                    sample: None,
                    presence: PresenceFlag {
                        online: true,
                        last_seen: now,
                    },
                    descriptor: None,
                    seq,
                });
            // A brand-new entry was never online from a subscriber's
            // point of view, whatever its freshly-initialized flag
            // reads, so this first sighting still counts as a presence
            // change rather than silently being folded into the first
            // delta's metrics-only update.
            let was_online = existed && entry.presence.online;
            if let Some(prev) = &entry.sample {
                let elapsed = sample
                    .timestamp
                    .signed_duration_since(prev.timestamp)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if elapsed >= Duration::from_millis(100) {
                    let elapsed_secs = elapsed.as_secs_f64();
                    let rx_delta = sample
                        .network
                        .total_rx_bytes
                        .saturating_sub(prev.network.total_rx_bytes);
                    let tx_delta = sample
                        .network
                        .total_tx_bytes
                        .saturating_sub(prev.network.total_tx_bytes);
                    sample.network.rx_bytes_per_sec = Some(rx_delta as f64 / elapsed_secs);
                    sample.network.tx_bytes_per_sec = Some(tx_delta as f64 / elapsed_secs);
                }
            }
            entry.sample = Some(sample);
            entry.presence = PresenceFlag {
                online: true,
                last_seen: now,
            };
            entry.seq = seq;
            was_online
        };
        self.emit(identity.clone(), ChangeKind::SampleApplied, seq);
        if !was_online {
            self.emit(identity, ChangeKind::PresenceChanged, seq);
        }
    }

    /// Marks `identity` present or absent without altering its sample,
    /// used by heartbeats and by the presence sweep.
    pub fn mark_presence(&self, identity: &ServerIdentity, online: bool) {
        let shard = &self.shards[shard_for(identity)];
        let seq = self.next_seq();
        let now = Utc::now();
        let changed = {
            let mut entries = shard.entries.lock();
            match entries.get_mut(identity) {
                Some(entry) => {
                    let was_online = entry.presence.online;
                    entry.presence.online = online;
                    if online {
                        entry.presence.last_seen = now;
                    }
                    entry.seq = seq;
                    was_online != online
                }
                None => false,
            }
        };
        if changed {
            self.emit(identity.clone(), ChangeKind::PresenceChanged, seq);
        }
    }

    /// Guarantees `identity` has a `LiveEntry`, creating an empty,
    /// offline one (no sample, no descriptor) if it doesn't already
    /// exist. Used at startup to satisfy the invariant that the
    /// reserved `local` identity always exists, independent of whether
    /// anything has sampled it yet. A no-op, and emits nothing, if the
    /// entry is already present.
    pub fn ensure_identity(&self, identity: ServerIdentity) {
        let shard = &self.shards[shard_for(&identity)];
        let mut entries = shard.entries.lock();
        entries.entry(identity.clone()).or_insert_with(|| {
            let seq = self.next_seq();
            LiveEntry {
                identity,
                sample: None,
                presence: PresenceFlag {
                    online: false,
                    last_seen: Utc::now(),
                },
                descriptor: None,
                seq,
            }
        });
    }

    pub fn set_descriptor(&self, descriptor: ServerDescriptor) {
        let identity = descriptor.server_id.clone();
        let shard = &self.shards[shard_for(&identity)];
        let seq = self.next_seq();
        {
            let mut entries = shard.entries.lock();
            let entry = entries.entry(identity.clone()).or_insert_with(|| LiveEntry {
                identity: identity.clone(),
                sample: None,
                presence: PresenceFlag {
                    online: false,
                    last_seen: Utc::now(),
                },
                descriptor: None,
                seq,
            });
            entry.descriptor = Some(descriptor);
            entry.seq = seq;
        }
        self.emit(identity, ChangeKind::DescriptorChanged, seq);
    }

    pub fn remove(&self, identity: &ServerIdentity) {
        let shard = &self.shards[shard_for(identity)];
        let seq = self.next_seq();
        let existed = shard.entries.lock().remove(identity).is_some();
        if existed {
            self.emit(identity.clone(), ChangeKind::Removed, seq);
        }
    }

    pub fn get(&self, identity: &ServerIdentity) -> Option<LiveEntry> {
        self.shards[shard_for(identity)]
            .entries
            .lock()
            .get(identity)
            .cloned()
    }

    /// Cheap full snapshot for a newly connecting dashboard. Re-derives
    /// `online` against the presence window at read time rather than
    /// trusting the stored flag, since a host can go silent without an
    /// explicit offline transition ever being recorded.
    pub fn snapshot(&self) -> Vec<LiveEntry> {
        let now = Utc::now();
        let mut out = Vec::new();
        for shard in &self.shards {
            let entries = shard.entries.lock();
            out.extend(entries.values().cloned().map(|mut entry| {
                if entry.presence.online {
                    let silent_for = now.signed_duration_since(entry.presence.last_seen);
                    if silent_for.to_std().unwrap_or(Duration::ZERO) > self.presence_window {
                        entry.presence.online = false;
                    }
                }
                entry
            }));
        }
        out
    }

    /// Applies the presence-window rule to every entry still marked
    /// online but silent past the window, flipping them offline and
    /// emitting a `PresenceChanged` event. Called periodically by a
    /// background sweep so dashboards see the flip even with no new
    /// traffic to trigger a lazy re-derivation.
    pub fn sweep_presence(&self) {
        let now = Utc::now();
        let mut to_flip = Vec::new();
        for shard in &self.shards {
            let entries = shard.entries.lock();
            for entry in entries.values() {
                if entry.presence.online {
                    let silent_for = now.signed_duration_since(entry.presence.last_seen);
                    if silent_for.to_std().unwrap_or(Duration::ZERO) > self.presence_window {
                        to_flip.push(entry.identity.clone());
                    }
                }
            }
        }
        for identity in to_flip {
            self.mark_presence(&identity, false);
        }
    }
}

pub type SharedLiveState = Arc<LiveStateStore>;
