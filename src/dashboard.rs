//! Dashboard Fan-out Engine
//! Mission: Deliver initial state quickly and incremental updates
//! cheaply to each dashboard subscriber, per §4.5: Stream-Init →
//! Stream-Server ×N → Stream-End → (Delta | SiteSettings)*.
//!
//! One task per connection, mirroring the teacher's `handle_socket`
//! shape: an initial replay phase followed by a `tokio::select!` loop
//! that mixes a broadcast subscription with outbound ticks, breaking
//! the loop (and dropping the subscription) the moment a send fails.

use crate::live_state::{ChangeEvent, ChangeKind, SharedLiveState};
use crate::models::{GroupDimension, LiveEntry, ServerIdentity, SiteSettings};
use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const DELTA_TICK: Duration = Duration::from_secs(1);
const STALL_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct FanoutMetrics {
    pub subscribers_connected: AtomicU64,
    pub subscribers_stalled_total: AtomicU64,
}

/// Site-wide metadata the fan-out engine prepends to every new
/// connection's stream, independent of any one identity.
#[derive(Clone)]
pub struct DashboardContext {
    pub live: SharedLiveState,
    pub group_dimensions: Arc<parking_lot::RwLock<Vec<GroupDimension>>>,
    pub site_settings: Arc<parking_lot::RwLock<SiteSettings>>,
    /// Broadcasts admin-triggered settings changes to every connected
    /// subscriber as an out-of-band `SiteSettings` push, independent of
    /// the per-identity delta tick.
    pub site_settings_changes: tokio::sync::watch::Receiver<SiteSettings>,
    pub metrics: Arc<FanoutMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutgoingFrame<'a> {
    StreamInit {
        total_servers: usize,
        groups: &'a [GroupDimension],
        group_dimensions: &'a [GroupDimension],
        site_settings: &'a SiteSettings,
    },
    StreamServer {
        index: usize,
        total: usize,
        server: DashboardServer,
    },
    StreamEnd,
    Delta {
        ts: i64,
        d: Vec<DeltaEntry>,
    },
    SiteSettings {
        site_settings: SiteSettings,
    },
}

/// The `server` payload of a Stream-Server message — full detail, sent
/// once per identity during the initial replay.
#[derive(Debug, Serialize)]
struct DashboardServer {
    server_id: ServerIdentity,
    server_name: String,
    online: bool,
    metrics: Option<CompactMetrics>,
    location: Option<String>,
    provider: Option<String>,
    tag: Option<String>,
    group_values: std::collections::HashMap<String, String>,
}

/// The short-key metrics schema fixed by §6: `c/m/d/rx/tx/up`.
#[derive(Debug, Clone, Serialize)]
struct CompactMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    c: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    m: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    up: Option<u64>,
}

impl CompactMetrics {
    fn from_entry(entry: &LiveEntry) -> Option<Self> {
        let sample = entry.sample.as_ref()?;
        Some(Self {
            c: Some(sample.cpu.usage_percent),
            m: Some(sample.memory.used_percent),
            d: sample.disks.first().map(|d| d.used_percent),
            rx: sample.network.rx_bytes_per_sec,
            tx: sample.network.tx_bytes_per_sec,
            up: Some(sample.host.uptime_secs),
        })
    }
}

fn to_dashboard_server(entry: &LiveEntry) -> DashboardServer {
    let descriptor = entry.descriptor.as_ref();
    DashboardServer {
        server_id: entry.identity.clone(),
        server_name: descriptor
            .map(|d| d.server_name.clone())
            .unwrap_or_else(|| entry.identity.as_str().to_string()),
        online: entry.presence.online,
        metrics: CompactMetrics::from_entry(entry),
        location: descriptor.and_then(|d| d.location.clone()),
        provider: descriptor.and_then(|d| d.provider.clone()),
        tag: descriptor.and_then(|d| d.tag.clone()),
        group_values: descriptor.map(|d| d.group_values.clone()).unwrap_or_default(),
    }
}

#[derive(Debug, Serialize)]
struct DeltaEntry {
    id: ServerIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    m: Option<CompactMetrics>,
}

/// Which of a delta entry's optional fields an identity's accumulated
/// changes actually warrant. Folding `ChangeKind::DescriptorChanged`
/// and `ChangeKind::Removed` into neither flag is deliberate: the
/// compact delta schema has no field for either, so a delta carrying
/// only those has nothing to report.
#[derive(Debug, Clone, Copy, Default)]
struct DirtyKinds {
    presence_changed: bool,
    sample_changed: bool,
}

impl DirtyKinds {
    fn merge(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::SampleApplied => self.sample_changed = true,
            ChangeKind::PresenceChanged => self.presence_changed = true,
            ChangeKind::DescriptorChanged | ChangeKind::Removed => {}
        }
    }
}

/// Per-connection state: the identities touched since the last tick
/// plus *what* changed about each, mirroring the "dirty set" described
/// in §4.5. Coalescing falls out for free since this is a map, not a
/// queue — touching the same identity twice between ticks still sends
/// one delta entry, with both changes' kinds merged in.
struct DirtySet {
    identities: std::collections::HashMap<ServerIdentity, DirtyKinds>,
}

impl DirtySet {
    fn new() -> Self {
        Self {
            identities: std::collections::HashMap::new(),
        }
    }

    fn mark(&mut self, identity: ServerIdentity, kind: ChangeKind) {
        self.identities.entry(identity).or_default().merge(kind);
    }

    fn drain(&mut self) -> std::collections::HashMap<ServerIdentity, DirtyKinds> {
        std::mem::take(&mut self.identities)
    }
}

pub async fn handle_socket(mut socket: WebSocket, ctx: DashboardContext) {
    ctx.metrics.subscribers_connected.fetch_add(1, Ordering::Relaxed);
    let mut changes = ctx.live.subscribe();

    if send_initial_phase(&mut socket, &ctx).await.is_err() {
        ctx.metrics.subscribers_connected.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let mut dirty = DirtySet::new();
    let mut tick = tokio::time::interval(DELTA_TICK);
    let mut last_progress = Instant::now();
    let mut settings_changes = ctx.site_settings_changes.clone();

    loop {
        tokio::select! {
            Ok(()) = settings_changes.changed() => {
                let settings = settings_changes.borrow().clone();
                if send_frame(&mut socket, &OutgoingFrame::SiteSettings { site_settings: settings }).await.is_err() {
                    break;
                }
            }
            changed = changes.recv() => {
                match changed {
                    Ok(ChangeEvent { identity, kind, .. }) => {
                        dirty.mark(identity, kind);
                        last_progress = Instant::now();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dashboard subscriber lagged, resnapshotting");
                        if resend_full_snapshot(&mut socket, &ctx).await.is_err() {
                            break;
                        }
                        dirty.drain();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tick.tick() => {
                if last_progress.elapsed() > STALL_GRACE {
                    ctx.metrics.subscribers_stalled_total.fetch_add(1, Ordering::Relaxed);
                    debug!("dashboard subscriber stalled past grace period, closing");
                    break;
                }
                let touched = dirty.drain();
                if touched.is_empty() {
                    continue;
                }
                if send_delta(&mut socket, &ctx, &touched).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_progress = Instant::now(),
                    Some(Err(_)) => break,
                }
            }
        }
    }

    ctx.metrics.subscribers_connected.fetch_sub(1, Ordering::Relaxed);
}

async fn send_initial_phase(socket: &mut WebSocket, ctx: &DashboardContext) -> Result<(), ()> {
    let snapshot = ctx.live.snapshot();
    let group_dimensions = ctx.group_dimensions.read().clone();
    let site_settings = ctx.site_settings.read().clone();

    send_frame(
        socket,
        &OutgoingFrame::StreamInit {
            total_servers: snapshot.len(),
            groups: &group_dimensions,
            group_dimensions: &group_dimensions,
            site_settings: &site_settings,
        },
    )
    .await?;

    let total = snapshot.len();
    for (index, entry) in snapshot.iter().enumerate() {
        send_frame(
            socket,
            &OutgoingFrame::StreamServer {
                index,
                total,
                server: to_dashboard_server(entry),
            },
        )
        .await?;
    }

    send_frame(socket, &OutgoingFrame::StreamEnd).await
}

async fn resend_full_snapshot(socket: &mut WebSocket, ctx: &DashboardContext) -> Result<(), ()> {
    send_initial_phase(socket, ctx).await
}

async fn send_delta(
    socket: &mut WebSocket,
    ctx: &DashboardContext,
    touched: &std::collections::HashMap<ServerIdentity, DirtyKinds>,
) -> Result<(), ()> {
    let mut entries = Vec::with_capacity(touched.len());
    for (identity, kinds) in touched {
        let Some(entry) = ctx.live.get(identity) else {
            continue;
        };
        let on = kinds.presence_changed.then_some(entry.presence.online);
        let m = kinds.sample_changed.then(|| CompactMetrics::from_entry(&entry)).flatten();
        if on.is_none() && m.is_none() {
            continue;
        }
        entries.push(DeltaEntry {
            id: identity.clone(),
            on,
            m,
        });
    }
    send_frame(
        socket,
        &OutgoingFrame::Delta {
            ts: chrono::Utc::now().timestamp(),
            d: entries,
        },
    )
    .await
}

async fn send_frame(socket: &mut WebSocket, frame: &OutgoingFrame<'_>) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    tokio::time::timeout(Duration::from_millis(500), socket.send(Message::Text(text)))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())
}
