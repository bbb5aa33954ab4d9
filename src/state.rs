//! Shared application state
//! Mission: The handles every HTTP/WebSocket handler needs — the Live
//! State Store, the persistence pipeline's writer/intake, the mutable
//! admin-owned taxonomy (group dimensions, site settings, ping targets,
//! descriptors), and the process-wide secrets. Built once in `main` and
//! cloned cheaply into every axum `State<AppState>` (every field is an
//! `Arc`, a `Copy`, or itself cheap to clone).

use crate::auth::JwtHandler;
use crate::dashboard::FanoutMetrics;
use crate::history::HistoryService;
use crate::ingest::IngestMetrics;
use crate::live_state::SharedLiveState;
use crate::models::{GroupDimension, PingTargetConfig, SiteSettings};
use crate::persistence::{IntakeQueue, PersistenceMetrics, Writer};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// Admin-mutable deployment taxonomy that isn't telemetry: group
/// dimensions, the legacy `groups` compatibility view, site settings,
/// and the ping target list forwarded to agents. Guarded by short
/// `RwLock` critical sections per §5 ("administrative update under an
/// exclusive lock; readers take a short read lock").
pub struct AdminState {
    /// `Arc`-wrapped so the Dashboard Fan-out Engine can hold its own
    /// clone of the lock directly (its `DashboardContext` predates and
    /// is independent of `AppState`) rather than needing the whole
    /// `AdminState` handle just to read two fields.
    pub group_dimensions: Arc<RwLock<Vec<GroupDimension>>>,
    pub ping_targets: RwLock<Vec<PingTargetConfig>>,
    pub site_settings: Arc<RwLock<SiteSettings>>,
    pub site_settings_tx: watch::Sender<SiteSettings>,
    pub admin_password_hash: RwLock<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub live: SharedLiveState,
    pub writer: Arc<Writer>,
    pub intake: Arc<IntakeQueue>,
    pub history: Arc<HistoryService>,
    pub jwt: Arc<JwtHandler>,
    pub admin: Arc<AdminState>,
    pub agent_token: Arc<str>,
    pub allow_anonymous_dashboards: bool,
    pub persistence_metrics: Arc<PersistenceMetrics>,
    pub ingest_metrics: Arc<IngestMetrics>,
    pub fanout_metrics: Arc<FanoutMetrics>,
}

impl AppState {
    pub fn site_settings_rx(&self) -> watch::Receiver<SiteSettings> {
        self.admin.site_settings_tx.subscribe()
    }
}
