//! Core data model
//! Mission: The shapes every component in the telemetry plane shares —
//! identities, descriptors, samples, and the live view derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved identity for the server's own host.
pub const LOCAL_IDENTITY: &str = "local";

/// Opaque stable key for one monitored host. Created on first agent
/// registration, immutable thereafter, destroyed only by admin removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerIdentity(pub String);

impl ServerIdentity {
    pub fn local() -> Self {
        Self(LOCAL_IDENTITY.to_string())
    }

    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_IDENTITY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ServerIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServerIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Human-assigned metadata. Mutated by the admin API, consumed verbatim
/// in dashboard payloads. Independent of telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub server_id: ServerIdentity,
    pub server_name: String,
    pub location: Option<String>,
    pub provider: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub price: Option<f64>,
    pub price_period: Option<String>,
    pub purchase_date: Option<DateTime<Utc>>,
    /// dimension_id -> option_id
    #[serde(default)]
    pub group_values: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub for_sale: bool,
}

impl ServerDescriptor {
    pub fn new(id: ServerIdentity, name: impl Into<String>) -> Self {
        Self {
            server_id: id,
            server_name: name.into(),
            location: None,
            provider: None,
            tag: None,
            tags: Vec::new(),
            price: None,
            price_period: None,
            purchase_date: None,
            group_values: std::collections::HashMap::new(),
            for_sale: false,
        }
    }
}

/// One observation from an agent or the local collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Server-assigned at receive time; agent-supplied time is advisory
    /// only and is not trusted for bucket placement.
    pub timestamp: DateTime<Utc>,
    pub cpu: Cpu,
    pub memory: Memory,
    #[serde(default)]
    pub disks: Vec<Disk>,
    pub network: Network,
    pub load: Load,
    pub host: Host,
    #[serde(default)]
    pub gpu: Vec<Gpu>,
    #[serde(default)]
    pub ping: Vec<PingResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cpu {
    pub brand: String,
    pub core_count: u32,
    /// Aggregate utilization in [0, 100].
    pub usage_percent: f32,
    #[serde(default)]
    pub per_core_percent: Vec<f32>,
    pub frequency_mhz: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub used_percent: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub device_name: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub used_percent: f32,
    pub media_class: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
    /// Derived, not agent-supplied: instantaneous bytes/sec computed by
    /// the Live State Store from the previous sample of the same
    /// identity. Absent until a second sample establishes a delta.
    #[serde(default)]
    pub rx_bytes_per_sec: Option<f64>,
    #[serde(default)]
    pub tx_bytes_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub arch: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gpu {
    pub vendor: String,
    pub name: String,
    pub usage_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub temperature_celsius: Option<f32>,
    pub power_watts: Option<f32>,
    pub clock_mhz: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingStatus {
    Ok,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResult {
    pub name: String,
    pub host: String,
    pub latency_ms: Option<f64>,
    pub loss_percent: f32,
    pub status: PingStatus,
}

/// Admin-configured probe target, forwarded to agents and consumed by
/// the local collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingTargetConfig {
    pub name: String,
    pub host: String,
}

/// Presence state for one identity: last-seen plus a derived online
/// flag evaluated against the presence window at read time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PresenceFlag {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Current state for one identity, exclusively owned by the Live State
/// Store. `sample` is retained byte-for-byte across a presence flip to
/// offline so historical dashboards can render last-known values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEntry {
    pub identity: ServerIdentity,
    pub sample: Option<Sample>,
    pub presence: PresenceFlag,
    pub descriptor: Option<ServerDescriptor>,
    /// Monotonic sequence number bumped on every mutation, used by the
    /// fan-out engine to detect "did anything change since last tick".
    pub seq: u64,
}

/// Admin taxonomy for dashboard categorization. Never affects ingest
/// or persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDimension {
    pub id: String,
    pub name: String,
    pub options: Vec<GroupOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOption {
    pub id: String,
    pub label: String,
}

/// Site-wide settings passed through to dashboards verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteSettings {
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}
