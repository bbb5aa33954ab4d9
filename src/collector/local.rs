//! Local collector
//! Mission: Sample the host this process runs on at 1s/5s/10s cadences,
//! producing the same `Sample` shape an agent would push over the wire.
//!
//! The cached `System` handle mirrors the teacher's
//! `performance::memory::MemoryProfiler::system_memory` pattern: a
//! `sysinfo::System` is expensive to construct but cheap to refresh, so
//! one lives behind a `Mutex` for the life of the process rather than
//! being rebuilt every tick.

use crate::models::{Cpu, Disk, Host, Load, Memory, Network, NetworkInterface, Sample};
use parking_lot::Mutex;
use std::sync::OnceLock;
use sysinfo::{Disks, Networks, System};

static CACHED_SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();

fn system() -> &'static Mutex<System> {
    CACHED_SYSTEM.get_or_init(|| Mutex::new(System::new_all()))
}

/// Interfaces never worth reporting: loopback, container/VM bridges,
/// and OS-level tunnel interfaces across Linux/macOS/BSD. Matches the
/// teacher's interface skip-list intent in `performance::network`,
/// generalized past Linux-only `/proc` parsing since sysinfo already
/// abstracts the platform split.
const SKIP_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "utun", "awdl", "llw",
];

fn should_skip_interface(name: &str) -> bool {
    SKIP_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

static DEFAULT_GATEWAY: OnceLock<Option<String>> = OnceLock::new();

/// Best-effort default gateway lookup, computed once and cached for the
/// life of the process — a gateway change mid-run (rare, and not
/// actionable by this process) is not worth re-probing every tick.
/// Currently diagnostic only: no wire field carries it yet.
pub fn default_gateway() -> Option<&'static str> {
    DEFAULT_GATEWAY
        .get_or_init(detect_default_gateway)
        .as_deref()
}

#[cfg(target_os = "linux")]
fn detect_default_gateway() -> Option<String> {
    let route = std::fs::read_to_string("/proc/net/route").ok()?;
    for line in route.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let (iface, destination, gateway_hex) = (fields[0], fields[1], fields[2]);
        if destination != "00000000" {
            continue;
        }
        let gateway = u32::from_str_radix(gateway_hex, 16).ok()?;
        let octets = gateway.to_le_bytes();
        return Some(format!(
            "{}.{}.{}.{} ({iface})",
            octets[0], octets[1], octets[2], octets[3]
        ));
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn detect_default_gateway() -> Option<String> {
    None
}

pub struct LocalCollector;

impl LocalCollector {
    pub fn new() -> Self {
        Self
    }

    /// Takes one sample of the local host. Blocking but fast (a few
    /// milliseconds); callers run it on a dedicated interval task, not
    /// inline in a request handler.
    pub fn sample(&self) -> Sample {
        let mut sys = system().lock();
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let cpu_usage = sys.global_cpu_usage();
        let per_core: Vec<f32> = sys.cpus().iter().map(|c| c.cpu_usage()).collect();
        let brand = sys
            .cpus()
            .first()
            .map(|c| c.brand().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let frequency = sys.cpus().first().map(|c| c.frequency()).unwrap_or(0);

        let total_mem = sys.total_memory();
        let used_mem = sys.used_memory();
        let available_mem = sys.available_memory();
        let used_percent = if total_mem > 0 {
            (used_mem as f64 / total_mem as f64 * 100.0) as f32
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_list = disks
            .list()
            .iter()
            .map(|d| {
                let total = d.total_space();
                let available = d.available_space();
                let used = total.saturating_sub(available);
                Disk {
                    device_name: d.name().to_string_lossy().to_string(),
                    total_bytes: total,
                    used_bytes: used,
                    used_percent: if total > 0 {
                        (used as f64 / total as f64 * 100.0) as f32
                    } else {
                        0.0
                    },
                    media_class: format!("{:?}", d.kind()),
                    mount_path: d.mount_point().to_string_lossy().to_string(),
                }
            })
            .collect();

        let networks = Networks::new_with_refreshed_list();
        let mut total_rx = 0u64;
        let mut total_tx = 0u64;
        let interfaces: Vec<NetworkInterface> = networks
            .iter()
            .filter(|(name, _)| !should_skip_interface(name))
            .map(|(name, data)| {
                total_rx += data.total_received();
                total_tx += data.total_transmitted();
                NetworkInterface {
                    name: name.clone(),
                    rx_bytes: data.total_received(),
                    tx_bytes: data.total_transmitted(),
                    rx_packets: data.total_packets_received(),
                    tx_packets: data.total_packets_transmitted(),
                }
            })
            .collect();

        let load = System::load_average();

        Sample {
            timestamp: chrono::Utc::now(),
            cpu: Cpu {
                brand,
                core_count: sys.cpus().len() as u32,
                usage_percent: cpu_usage,
                per_core_percent: per_core,
                frequency_mhz: frequency,
            },
            memory: Memory {
                total_bytes: total_mem,
                used_bytes: used_mem,
                available_bytes: available_mem,
                swap_total_bytes: sys.total_swap(),
                swap_used_bytes: sys.used_swap(),
                used_percent,
            },
            disks: disk_list,
            network: Network {
                interfaces,
                total_rx_bytes: total_rx,
                total_tx_bytes: total_tx,
                rx_bytes_per_sec: None,
                tx_bytes_per_sec: None,
            },
            load: Load {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            host: Host {
                hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
                os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
                os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
                kernel_version: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
                arch: std::env::consts::ARCH.to_string(),
                uptime_secs: System::uptime(),
            },
            gpu: Vec::new(),
            ping: Vec::new(),
        }
    }
}

impl Default for LocalCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_list_matches_loopback_and_bridges() {
        assert!(should_skip_interface("lo"));
        assert!(should_skip_interface("docker0"));
        assert!(should_skip_interface("veth1234"));
        assert!(should_skip_interface("virbr0"));
        assert!(should_skip_interface("utun3"));
        assert!(should_skip_interface("awdl0"));
        assert!(should_skip_interface("llw0"));
        assert!(!should_skip_interface("eth0"));
    }

    #[test]
    fn default_gateway_lookup_does_not_panic() {
        let _ = default_gateway();
    }

    #[test]
    fn sample_produces_nonzero_core_count() {
        let collector = LocalCollector::new();
        let sample = collector.sample();
        assert!(sample.cpu.core_count >= 1);
    }
}
