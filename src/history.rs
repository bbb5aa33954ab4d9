//! History Service
//! Mission: Answer "what did this server look like over the last
//! `range`" by reading the one resolution table that natively covers
//! that range, then stitching a regular, now-anchored grid over the
//! stored buckets — distinguishing a cell that has no data at all
//! (nothing collected yet that far back) from one that is legitimately
//! zero.

use crate::models::{PingTargetConfig, ServerIdentity};
use crate::persistence::{Bucket, PingBucket, Resolution, Writer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// The five fixed lookback windows the history endpoint accepts, one
/// per resolution table — §6's `range=<1h|24h|7d|30d|1y>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    OneHour,
    Day,
    Week,
    Month,
    Year,
}

impl HistoryRange {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Self::OneHour),
            "24h" => Some(Self::Day),
            "7d" => Some(Self::Week),
            "30d" => Some(Self::Month),
            "1y" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
            Self::Year => "1y",
        }
    }

    /// Each range maps to exactly one resolution table — there is no
    /// "smallest resolution that covers the span" search because the
    /// distilled spec fixes the five ranges to the five resolutions
    /// 1:1 by construction (retention_secs() already equals the range).
    fn resolution(self) -> Resolution {
        match self {
            Self::OneHour => Resolution::Raw,
            Self::Day => Resolution::Minutely,
            Self::Week => Resolution::QuarterHourly,
            Self::Month => Resolution::Hourly,
            Self::Year => Resolution::TwiceDaily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Metrics,
    Ping,
    All,
}

impl HistoryKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metrics" => Some(Self::Metrics),
            "ping" => Some(Self::Ping),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn wants_metrics(self) -> bool {
        matches!(self, Self::Metrics | Self::All)
    }

    fn wants_ping(self) -> bool {
        matches!(self, Self::Ping | Self::All)
    }
}

impl Default for HistoryKind {
    fn default() -> Self {
        Self::Metrics
    }
}

#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub identity: ServerIdentity,
    pub range: HistoryRange,
    pub kind: HistoryKind,
}

/// One grid cell in the metrics series. `None` means "no data", `Some`
/// means either a real bucket or a zero-filled gap — the wire contract
/// does not distinguish those two on the metrics side, only history's
/// internal grid construction does (see `query`).
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub timestamp: i64,
    pub cpu: Option<f32>,
    pub memory: Option<f32>,
    pub disk: Option<f32>,
    pub net_rx: Option<f64>,
    pub net_tx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingPoint {
    pub timestamp: i64,
    pub latency_ms: Option<f64>,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingTargetSeries {
    pub name: String,
    pub host: String,
    pub data: Vec<PingPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub server_id: String,
    pub range: &'static str,
    pub data: Vec<HistoryPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_targets: Option<Vec<PingTargetSeries>>,
}

pub struct HistoryService {
    writer: Arc<Writer>,
}

impl HistoryService {
    pub fn new(writer: Arc<Writer>) -> Self {
        Self { writer }
    }

    /// Builds a `HistoryResponse` anchored to `now` (passed in rather
    /// than read internally so tests can fix it). `ping_targets` is the
    /// admin-configured target list, used to enumerate per-target
    /// series when `kind` asks for ping data; ignored for `Metrics`.
    pub fn query(
        &self,
        query: &HistoryQuery,
        now: chrono::DateTime<chrono::Utc>,
        ping_targets: &[PingTargetConfig],
    ) -> anyhow::Result<HistoryResponse> {
        let resolution = query.range.resolution();
        let width = resolution.bucket_width_secs();
        let points = resolution.retained_points() as i64;
        let grid_end = resolution.bucket_start(now);
        let grid_start = grid_end - (points - 1) * width;

        let mut data = Vec::new();
        let mut ping_targets_out = None;

        if query.kind.wants_metrics() {
            let rows = self.writer.query_range(
                query.identity.as_str(),
                resolution,
                grid_start,
                grid_end + width,
            )?;
            let earliest = rows.iter().map(|b| b.bucket_start).min();
            let by_start: HashMap<i64, &Bucket> =
                rows.iter().map(|b| (b.bucket_start, b)).collect();

            // When exactly one ping target is configured, fold its
            // per-bucket mean latency into each metrics point's
            // `ping_ms` field so a single-target deployment gets a
            // combined series without a second round trip.
            let solo_ping: Option<Vec<PingBucket>> = if query.kind.wants_ping()
                && ping_targets.len() == 1
            {
                Some(self.writer.query_ping_range(
                    query.identity.as_str(),
                    &ping_targets[0].name,
                    resolution,
                    grid_start,
                    grid_end + width,
                )?)
            } else {
                None
            };
            let ping_by_start: HashMap<i64, &PingBucket> = solo_ping
                .as_ref()
                .map(|v| v.iter().map(|p| (p.bucket_start, p)).collect())
                .unwrap_or_default();

            let mut cursor = grid_start;
            while cursor <= grid_end {
                let ping_ms = ping_by_start.get(&cursor).and_then(|p| p.latency_ms_avg);
                let point = match by_start.get(&cursor) {
                    Some(bucket) => HistoryPoint {
                        timestamp: cursor,
                        cpu: Some(bucket.cpu_usage_avg),
                        memory: Some(bucket.memory_used_avg_percent),
                        disk: Some(bucket.disk_used_avg_percent),
                        net_rx: Some(bucket.network_rx_bytes_per_sec_max),
                        net_tx: Some(bucket.network_tx_bytes_per_sec_max),
                        ping_ms,
                    },
                    None if earliest.is_some_and(|e| cursor < e) => HistoryPoint {
                        timestamp: cursor,
                        cpu: None,
                        memory: None,
                        disk: None,
                        net_rx: None,
                        net_tx: None,
                        ping_ms: None,
                    },
                    None => HistoryPoint {
                        timestamp: cursor,
                        cpu: Some(0.0),
                        memory: Some(0.0),
                        disk: Some(0.0),
                        net_rx: Some(0.0),
                        net_tx: Some(0.0),
                        ping_ms,
                    },
                };
                data.push(point);
                cursor += width;
            }
        }

        if query.kind.wants_ping() {
            let mut series = Vec::with_capacity(ping_targets.len());
            for target in ping_targets {
                let rows = self.writer.query_ping_range(
                    query.identity.as_str(),
                    &target.name,
                    resolution,
                    grid_start,
                    grid_end + width,
                )?;
                let by_start: HashMap<i64, &PingBucket> =
                    rows.iter().map(|p| (p.bucket_start, p)).collect();
                let mut points = Vec::new();
                let mut cursor = grid_start;
                while cursor <= grid_end {
                    let point = match by_start.get(&cursor) {
                        Some(bucket) => PingPoint {
                            timestamp: cursor,
                            latency_ms: bucket.latency_ms_avg,
                            status: ping_status_label(bucket),
                        },
                        None => PingPoint {
                            timestamp: cursor,
                            latency_ms: None,
                            status: "no_data",
                        },
                    };
                    points.push(point);
                    cursor += width;
                }
                series.push(PingTargetSeries {
                    name: target.name.clone(),
                    host: target.host.clone(),
                    data: points,
                });
            }
            ping_targets_out = Some(series);
        }

        Ok(HistoryResponse {
            server_id: query.identity.as_str().to_string(),
            range: query.range.as_str(),
            data,
            ping_targets: ping_targets_out,
        })
    }
}

fn ping_status_label(bucket: &PingBucket) -> &'static str {
    if bucket.loss_percent_avg >= 100.0 {
        "timeout"
    } else if bucket.latency_ms_avg.is_none() {
        "error"
    } else {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket(server_id: &str, resolution: Resolution, bucket_start: i64) -> Bucket {
        Bucket {
            server_id: server_id.to_string(),
            resolution,
            bucket_start,
            sample_count: 1,
            cpu_usage_avg: 42.0,
            memory_used_avg_percent: 10.0,
            disk_used_avg_percent: 5.0,
            network_rx_bytes_per_sec_max: 0.0,
            network_tx_bytes_per_sec_max: 0.0,
            network_rx_bytes_delta: 0,
            network_tx_bytes_delta: 0,
            load_one_avg: 0.0,
            hostname: "h".into(),
            os_name: "linux".into(),
            uptime_secs: 1,
        }
    }

    #[test]
    fn range_maps_to_resolution_one_to_one() {
        assert_eq!(HistoryRange::OneHour.resolution(), Resolution::Raw);
        assert_eq!(HistoryRange::Year.resolution(), Resolution::TwiceDaily);
    }

    #[test]
    fn grid_distinguishes_no_data_from_zero_fill() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let writer = Arc::new(Writer::open(tmp.path()).unwrap());
        let now = chrono::Utc.timestamp_opt(1_000_000, 0).unwrap();
        let resolution = Resolution::Raw;
        let grid_end = resolution.bucket_start(now);
        let width = resolution.bucket_width_secs();
        let earliest_cell = grid_end - 2 * width;
        writer
            .flush_buckets(&[
                bucket("s1", resolution, earliest_cell),
                bucket("s1", resolution, grid_end),
            ])
            .unwrap();

        let service = HistoryService::new(writer);
        let resp = service
            .query(
                &HistoryQuery {
                    identity: ServerIdentity::from("s1"),
                    range: HistoryRange::OneHour,
                    kind: HistoryKind::Metrics,
                },
                now,
                &[],
            )
            .unwrap();

        let earliest_point = resp
            .data
            .iter()
            .find(|p| p.timestamp == earliest_cell)
            .unwrap();
        assert!(earliest_point.cpu.is_some());

        let before_earliest = resp
            .data
            .iter()
            .find(|p| p.timestamp == earliest_cell - width)
            .unwrap();
        assert!(before_earliest.cpu.is_none(), "cell before earliest bucket must be no-data");

        let gap_cell = resp
            .data
            .iter()
            .find(|p| p.timestamp == earliest_cell + width)
            .unwrap();
        assert_eq!(gap_cell.cpu, Some(0.0), "gap within collected period must be zero-filled");
    }

    #[test]
    fn empty_identity_returns_all_no_data() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let writer = Arc::new(Writer::open(tmp.path()).unwrap());
        let now = chrono::Utc::now();
        let service = HistoryService::new(writer);
        let resp = service
            .query(
                &HistoryQuery {
                    identity: ServerIdentity::from("ghost"),
                    range: HistoryRange::OneHour,
                    kind: HistoryKind::Metrics,
                },
                now,
                &[],
            )
            .unwrap();
        assert!(resp.data.iter().all(|p| p.cpu.is_none()));
    }
}
