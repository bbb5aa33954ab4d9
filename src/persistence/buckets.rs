//! Bucket geometry
//! Mission: The five fixed resolutions retained by the pipeline, and the
//! arithmetic for mapping a timestamp to the bucket it falls in.
//! Boundaries are left-closed, right-open: a sample at exactly a bucket
//! boundary belongs to the bucket that starts there, never the one that
//! just closed.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// 5s buckets, 720 points, 1h retention.
    Raw,
    /// 2min buckets, 720 points, 24h retention.
    Minutely,
    /// 15min buckets, 672 points, 7d retention.
    QuarterHourly,
    /// 1h buckets, 720 points, 30d retention.
    Hourly,
    /// 12h buckets, 730 points, 1y retention.
    TwiceDaily,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Raw,
        Resolution::Minutely,
        Resolution::QuarterHourly,
        Resolution::Hourly,
        Resolution::TwiceDaily,
    ];

    pub fn bucket_width_secs(self) -> i64 {
        match self {
            Resolution::Raw => 5,
            Resolution::Minutely => 120,
            Resolution::QuarterHourly => 900,
            Resolution::Hourly => 3600,
            Resolution::TwiceDaily => 43_200,
        }
    }

    pub fn retained_points(self) -> usize {
        match self {
            Resolution::Raw => 720,
            Resolution::Minutely => 720,
            Resolution::QuarterHourly => 672,
            Resolution::Hourly => 720,
            Resolution::TwiceDaily => 730,
        }
    }

    pub fn retention_secs(self) -> i64 {
        self.bucket_width_secs() * self.retained_points() as i64
    }

    pub fn table_name(self) -> &'static str {
        match self {
            Resolution::Raw => "samples_raw",
            Resolution::Minutely => "samples_2m",
            Resolution::QuarterHourly => "samples_15m",
            Resolution::Hourly => "samples_1h",
            Resolution::TwiceDaily => "samples_12h",
        }
    }

    /// Maps `at` to the epoch-seconds start of the bucket it belongs to.
    pub fn bucket_start(self, at: DateTime<Utc>) -> i64 {
        let width = self.bucket_width_secs();
        let secs = at.timestamp();
        secs.div_euclid(width) * width
    }

    pub fn bucket_start_time(self, at: DateTime<Utc>) -> DateTime<Utc> {
        Utc.timestamp_opt(self.bucket_start(at), 0).unwrap()
    }
}

/// One rolled-up observation for one identity at one resolution. Numeric
/// fields are the chosen aggregation method applied across every raw
/// sample that landed in this bucket (mean for gauges, max for peak
/// counters such as network rate, per the aggregation-method design
/// note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub server_id: String,
    pub resolution: Resolution,
    pub bucket_start: i64,
    pub sample_count: u32,
    pub cpu_usage_avg: f32,
    pub memory_used_avg_percent: f32,
    /// Mean used-percent of the sample's primary disk (first entry in
    /// `disks`), mirroring the history endpoint's single `disk` field.
    pub disk_used_avg_percent: f32,
    pub network_rx_bytes_per_sec_max: f64,
    pub network_tx_bytes_per_sec_max: f64,
    pub load_one_avg: f64,
    /// Delta over the bucket, not a rate: total bytes seen across every
    /// interface between the first and last sample folded in.
    pub network_rx_bytes_delta: u64,
    pub network_tx_bytes_delta: u64,
    /// Last-seen-within-the-bucket status fields, per §4.4 stage 2.
    pub hostname: String,
    pub os_name: String,
    pub uptime_secs: u64,
}

impl Bucket {
    pub fn new_empty(server_id: String, resolution: Resolution, bucket_start: i64) -> Self {
        Self {
            server_id,
            resolution,
            bucket_start,
            sample_count: 0,
            cpu_usage_avg: 0.0,
            memory_used_avg_percent: 0.0,
            disk_used_avg_percent: 0.0,
            network_rx_bytes_per_sec_max: 0.0,
            network_tx_bytes_per_sec_max: 0.0,
            load_one_avg: 0.0,
            network_rx_bytes_delta: 0,
            network_tx_bytes_delta: 0,
            hostname: String::new(),
            os_name: String::new(),
            uptime_secs: 0,
        }
    }

    /// Folds one raw sample into the running average/max for this
    /// bucket. Averages are computed incrementally so the bucket never
    /// needs to retain the individual samples that formed it.
    ///
    /// `rx_delta`/`tx_delta` are the positive sample-to-sample network
    /// deltas the aggregator has already computed (counter resets never
    /// reach here as negative numbers); they accumulate into the
    /// bucket's delta-over-bucket totals per §4.4 stage 2.
    pub fn fold(&mut self, sample: &crate::models::Sample, rx_delta: u64, tx_delta: u64) {
        let n = self.sample_count as f64;
        let next_n = n + 1.0;
        self.cpu_usage_avg =
            (((self.cpu_usage_avg as f64) * n + sample.cpu.usage_percent as f64) / next_n) as f32;
        self.memory_used_avg_percent = (((self.memory_used_avg_percent as f64) * n
            + sample.memory.used_percent as f64)
            / next_n) as f32;
        if let Some(primary) = sample.disks.first() {
            self.disk_used_avg_percent = (((self.disk_used_avg_percent as f64) * n
                + primary.used_percent as f64)
                / next_n) as f32;
        }
        self.load_one_avg = (self.load_one_avg * n + sample.load.one) / next_n;
        if let Some(rx) = sample.network.rx_bytes_per_sec {
            self.network_rx_bytes_per_sec_max = self.network_rx_bytes_per_sec_max.max(rx);
        }
        if let Some(tx) = sample.network.tx_bytes_per_sec {
            self.network_tx_bytes_per_sec_max = self.network_tx_bytes_per_sec_max.max(tx);
        }
        self.network_rx_bytes_delta += rx_delta;
        self.network_tx_bytes_delta += tx_delta;
        self.hostname = sample.host.hostname.clone();
        self.os_name = sample.host.os_name.clone();
        self.uptime_secs = sample.host.uptime_secs;
        self.sample_count += 1;
    }
}

/// One rolled-up ping-probe observation for one (identity, target) pair
/// at one resolution, mirroring `Bucket` but keyed one level deeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingBucket {
    pub server_id: String,
    pub target_name: String,
    pub resolution: Resolution,
    pub bucket_start: i64,
    pub sample_count: u32,
    pub latency_ms_avg: Option<f64>,
    pub loss_percent_avg: f32,
}

impl PingBucket {
    pub fn new_empty(
        server_id: String,
        target_name: String,
        resolution: Resolution,
        bucket_start: i64,
    ) -> Self {
        Self {
            server_id,
            target_name,
            resolution,
            bucket_start,
            sample_count: 0,
            latency_ms_avg: None,
            loss_percent_avg: 0.0,
        }
    }

    pub fn fold(&mut self, result: &crate::models::PingResult) {
        let n = self.sample_count as f64;
        let next_n = n + 1.0;
        if let Some(latency) = result.latency_ms {
            let prior = self.latency_ms_avg.unwrap_or(0.0);
            self.latency_ms_avg = Some((prior * n + latency) / next_n);
        }
        self.loss_percent_avg =
            (((self.loss_percent_avg as f64) * n + result.loss_percent as f64) / next_n) as f32;
        self.sample_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bucket_start_is_left_closed() {
        let at = Utc.timestamp_opt(123, 0).unwrap();
        assert_eq!(Resolution::Raw.bucket_start(at), 120);
        let at_boundary = Utc.timestamp_opt(120, 0).unwrap();
        assert_eq!(Resolution::Raw.bucket_start(at_boundary), 120);
    }

    #[test]
    fn retention_matches_spec_table() {
        assert_eq!(Resolution::Raw.retention_secs(), 3600);
        assert_eq!(Resolution::Minutely.retention_secs(), 86_400);
        assert_eq!(Resolution::QuarterHourly.retention_secs(), 604_800);
        assert_eq!(Resolution::Hourly.retention_secs(), 2_592_000);
        assert_eq!(Resolution::TwiceDaily.retention_secs(), 31_536_000);
    }

    fn minimal_sample(cpu_usage_percent: f32) -> crate::models::Sample {
        use crate::models::{Cpu, Host, Load, Memory, Network, Sample};
        Sample {
            timestamp: Utc::now(),
            cpu: Cpu {
                brand: "t".into(),
                core_count: 1,
                usage_percent: cpu_usage_percent,
                per_core_percent: vec![],
                frequency_mhz: 1000,
            },
            memory: Memory {
                total_bytes: 100,
                used_bytes: 10,
                available_bytes: 90,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
                used_percent: 10.0,
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
    fn fold_computes_running_average() {
        let mut bucket = Bucket::new_empty("s".into(), Resolution::Raw, 0);
        bucket.fold(&minimal_sample(10.0), 100, 50);
        bucket.fold(&minimal_sample(20.0), 200, 50);
        assert!((bucket.cpu_usage_avg - 15.0).abs() < 0.001);
        assert_eq!(bucket.sample_count, 2);
        assert_eq!(bucket.network_rx_bytes_delta, 300);
        assert_eq!(bucket.network_tx_bytes_delta, 100);
    }
}
