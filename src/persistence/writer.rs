//! Durable writer
//! Mission: Commit closed buckets to SQLite in batches, one transaction
//! per flush per the teacher's `signals/db_storage.rs` batching
//! convention: WAL journal, `synchronous = NORMAL`, one table per
//! resolution keyed by `(server_id, bucket_start)` so a re-flush of the
//! same bucket after a crash is an idempotent upsert rather than a
//! duplicate row.

use super::buckets::{Bucket, PingBucket, Resolution};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

pub struct Writer {
    conn: Mutex<Connection>,
}

impl Writer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).context("opening sqlite database")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let writer = Self {
            conn: Mutex::new(conn),
        };
        writer.init_schema()?;
        Ok(writer)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        for resolution in Resolution::ALL {
            let table = resolution.table_name();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    server_id TEXT NOT NULL,
                    bucket_start INTEGER NOT NULL,
                    sample_count INTEGER NOT NULL,
                    cpu_usage_avg REAL NOT NULL,
                    memory_used_avg_percent REAL NOT NULL,
                    disk_used_avg_percent REAL NOT NULL,
                    network_rx_bytes_per_sec_max REAL NOT NULL,
                    network_tx_bytes_per_sec_max REAL NOT NULL,
                    network_rx_bytes_delta INTEGER NOT NULL,
                    network_tx_bytes_delta INTEGER NOT NULL,
                    load_one_avg REAL NOT NULL,
                    hostname TEXT NOT NULL DEFAULT '',
                    os_name TEXT NOT NULL DEFAULT '',
                    uptime_secs INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (server_id, bucket_start)
                ) WITHOUT ROWID;"
            ))?;
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ping_samples (
                server_id TEXT NOT NULL,
                target_name TEXT NOT NULL,
                resolution TEXT NOT NULL,
                bucket_start INTEGER NOT NULL,
                sample_count INTEGER NOT NULL,
                latency_ms_avg REAL,
                loss_percent_avg REAL NOT NULL,
                PRIMARY KEY (server_id, target_name, resolution, bucket_start)
            ) WITHOUT ROWID;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS descriptors (
                server_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Upserts a batch of closed buckets in a single transaction. A
    /// crash mid-batch leaves already-committed buckets durable and the
    /// rest simply un-flushed — they are reconstructed from the next
    /// round of live samples, never partially written.
    pub fn flush_buckets(&self, buckets: &[Bucket]) -> Result<()> {
        if buckets.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("starting flush transaction")?;
        for bucket in buckets {
            let table = bucket.resolution.table_name();
            tx.execute(
                &format!(
                    "INSERT INTO {table}
                        (server_id, bucket_start, sample_count, cpu_usage_avg,
                         memory_used_avg_percent, disk_used_avg_percent,
                         network_rx_bytes_per_sec_max, network_tx_bytes_per_sec_max,
                         network_rx_bytes_delta, network_tx_bytes_delta,
                         load_one_avg, hostname, os_name, uptime_secs)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                     ON CONFLICT(server_id, bucket_start) DO UPDATE SET
                        sample_count = excluded.sample_count,
                        cpu_usage_avg = excluded.cpu_usage_avg,
                        memory_used_avg_percent = excluded.memory_used_avg_percent,
                        disk_used_avg_percent = excluded.disk_used_avg_percent,
                        network_rx_bytes_per_sec_max = excluded.network_rx_bytes_per_sec_max,
                        network_tx_bytes_per_sec_max = excluded.network_tx_bytes_per_sec_max,
                        network_rx_bytes_delta = excluded.network_rx_bytes_delta,
                        network_tx_bytes_delta = excluded.network_tx_bytes_delta,
                        load_one_avg = excluded.load_one_avg,
                        hostname = excluded.hostname,
                        os_name = excluded.os_name,
                        uptime_secs = excluded.uptime_secs"
                ),
                params![
                    bucket.server_id,
                    bucket.bucket_start,
                    bucket.sample_count,
                    bucket.cpu_usage_avg,
                    bucket.memory_used_avg_percent,
                    bucket.disk_used_avg_percent,
                    bucket.network_rx_bytes_per_sec_max,
                    bucket.network_tx_bytes_per_sec_max,
                    bucket.network_rx_bytes_delta,
                    bucket.network_tx_bytes_delta,
                    bucket.load_one_avg,
                    bucket.hostname,
                    bucket.os_name,
                    bucket.uptime_secs,
                ],
            )
            .with_context(|| format!("upserting bucket into {table}"))?;
        }
        tx.commit().context("committing flush transaction")?;
        Ok(())
    }

    pub fn flush_ping_buckets(&self, buckets: &[PingBucket]) -> Result<()> {
        if buckets.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("starting ping flush transaction")?;
        for bucket in buckets {
            tx.execute(
                "INSERT INTO ping_samples
                    (server_id, target_name, resolution, bucket_start, sample_count,
                     latency_ms_avg, loss_percent_avg)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(server_id, target_name, resolution, bucket_start) DO UPDATE SET
                    sample_count = excluded.sample_count,
                    latency_ms_avg = excluded.latency_ms_avg,
                    loss_percent_avg = excluded.loss_percent_avg",
                params![
                    bucket.server_id,
                    bucket.target_name,
                    resolution_key(bucket.resolution),
                    bucket.bucket_start,
                    bucket.sample_count,
                    bucket.latency_ms_avg,
                    bucket.loss_percent_avg,
                ],
            )
            .context("upserting ping bucket")?;
        }
        tx.commit().context("committing ping flush transaction")?;
        Ok(())
    }

    pub fn query_range(
        &self,
        server_id: &str,
        resolution: Resolution,
        from_secs: i64,
        to_secs: i64,
    ) -> Result<Vec<Bucket>> {
        let table = resolution.table_name();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT server_id, bucket_start, sample_count, cpu_usage_avg,
                    memory_used_avg_percent, disk_used_avg_percent,
                    network_rx_bytes_per_sec_max, network_tx_bytes_per_sec_max,
                    network_rx_bytes_delta, network_tx_bytes_delta,
                    load_one_avg, hostname, os_name, uptime_secs
             FROM {table}
             WHERE server_id = ?1 AND bucket_start >= ?2 AND bucket_start < ?3
             ORDER BY bucket_start ASC"
        ))?;
        let rows = stmt.query_map(params![server_id, from_secs, to_secs], |row| {
            Ok(Bucket {
                server_id: row.get(0)?,
                resolution,
                bucket_start: row.get(1)?,
                sample_count: row.get(2)?,
                cpu_usage_avg: row.get(3)?,
                memory_used_avg_percent: row.get(4)?,
                disk_used_avg_percent: row.get(5)?,
                network_rx_bytes_per_sec_max: row.get(6)?,
                network_tx_bytes_per_sec_max: row.get(7)?,
                network_rx_bytes_delta: row.get(8)?,
                network_tx_bytes_delta: row.get(9)?,
                load_one_avg: row.get(10)?,
                hostname: row.get(11)?,
                os_name: row.get(12)?,
                uptime_secs: row.get(13)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn query_ping_range(
        &self,
        server_id: &str,
        target_name: &str,
        resolution: Resolution,
        from_secs: i64,
        to_secs: i64,
    ) -> Result<Vec<PingBucket>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT server_id, target_name, bucket_start, sample_count,
                    latency_ms_avg, loss_percent_avg
             FROM ping_samples
             WHERE server_id = ?1 AND target_name = ?2 AND resolution = ?3
               AND bucket_start >= ?4 AND bucket_start < ?5
             ORDER BY bucket_start ASC",
        )?;
        let rows = stmt.query_map(
            params![server_id, target_name, resolution_key(resolution), from_secs, to_secs],
            |row| {
                Ok(PingBucket {
                    server_id: row.get(0)?,
                    target_name: row.get(1)?,
                    resolution,
                    bucket_start: row.get(2)?,
                    sample_count: row.get(3)?,
                    latency_ms_avg: row.get(4)?,
                    loss_percent_avg: row.get(5)?,
                })
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Persists or replaces a descriptor, opaque JSON payload keyed by
    /// server_id, mirroring the "additional table stores
    /// ServerDescriptors and group taxonomy" line in §6.
    pub fn put_descriptor(&self, server_id: &str, payload_json: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO descriptors (server_id, payload) VALUES (?1, ?2)
             ON CONFLICT(server_id) DO UPDATE SET payload = excluded.payload",
            params![server_id, payload_json],
        )?;
        Ok(())
    }

    pub fn load_descriptors(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT payload FROM descriptors")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Deletes buckets older than `resolution`'s retention window,
    /// called by the retention sweeper. Never deletes the most recent
    /// bucket for any identity regardless of its age, per §4.9.
    pub fn delete_older_than(&self, resolution: Resolution, cutoff_secs: i64) -> Result<usize> {
        let table = resolution.table_name();
        let conn = self.conn.lock();
        let deleted = conn.execute(
            &format!(
                "DELETE FROM {table}
                 WHERE bucket_start < ?1
                   AND bucket_start < (
                       SELECT MAX(bucket_start) FROM {table} AS newest
                       WHERE newest.server_id = {table}.server_id
                   )"
            ),
            params![cutoff_secs],
        )?;
        Ok(deleted)
    }
}

fn resolution_key(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Raw => "raw",
        Resolution::Minutely => "minutely",
        Resolution::QuarterHourly => "quarter_hourly",
        Resolution::Hourly => "hourly",
        Resolution::TwiceDaily => "twice_daily",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(server_id: &str, bucket_start: i64) -> Bucket {
        Bucket {
            server_id: server_id.to_string(),
            resolution: Resolution::Raw,
            bucket_start,
            sample_count: 3,
            cpu_usage_avg: 12.5,
            memory_used_avg_percent: 40.0,
            disk_used_avg_percent: 20.0,
            network_rx_bytes_per_sec_max: 100.0,
            network_tx_bytes_per_sec_max: 50.0,
            network_rx_bytes_delta: 500,
            network_tx_bytes_delta: 250,
            load_one_avg: 0.5,
            hostname: "h".into(),
            os_name: "linux".into(),
            uptime_secs: 10,
        }
    }

    #[test]
    fn flush_then_query_roundtrips() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let writer = Writer::open(tmp.path()).unwrap();
        writer.flush_buckets(&[bucket("s1", 0), bucket("s1", 5)]).unwrap();
        let rows = writer.query_range("s1", Resolution::Raw, 0, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket_start, 0);
    }

    #[test]
    fn flush_is_idempotent_upsert() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let writer = Writer::open(tmp.path()).unwrap();
        writer.flush_buckets(&[bucket("s1", 0)]).unwrap();
        let mut updated = bucket("s1", 0);
        updated.sample_count = 99;
        writer.flush_buckets(&[updated]).unwrap();
        let rows = writer.query_range("s1", Resolution::Raw, 0, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sample_count, 99);
    }

    #[test]
    fn delete_older_than_prunes_expired_rows_but_keeps_newest() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let writer = Writer::open(tmp.path()).unwrap();
        writer
            .flush_buckets(&[bucket("s1", 0), bucket("s1", 1000)])
            .unwrap();
        let deleted = writer.delete_older_than(Resolution::Raw, 5000).unwrap();
        assert_eq!(deleted, 1);
        let rows = writer.query_range("s1", Resolution::Raw, 0, 10_000).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket_start, 1000, "newest bucket survives even past cutoff");
    }

    #[test]
    fn ping_bucket_roundtrips() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let writer = Writer::open(tmp.path()).unwrap();
        let pb = PingBucket {
            server_id: "s1".into(),
            target_name: "google".into(),
            resolution: Resolution::Raw,
            bucket_start: 0,
            sample_count: 2,
            latency_ms_avg: Some(12.5),
            loss_percent_avg: 0.0,
        };
        writer.flush_ping_buckets(&[pb]).unwrap();
        let rows = writer
            .query_ping_range("s1", "google", Resolution::Raw, 0, 10)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].latency_ms_avg, Some(12.5));
    }
}
