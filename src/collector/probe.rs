//! Probe runner
//! Mission: Reach every admin-configured ping target and classify the
//! result as ok/timeout/error, independent of the local collector's
//! host metrics.
//!
//! Raw ICMP needs elevated privileges this process should not assume it
//! has, so reachability is measured with a TCP connect probe (port 80
//! falling back to 443) timed the same way a real ping round-trip would
//! be — this is a deliberate substitution of mechanism, not of
//! semantics: latency_ms/loss_percent/status keep their contract.
//!
//! Per target: 3 attempts within an overall 3 s deadline. `status` is
//! `timeout` when every attempt timed out, `error` when every attempt
//! failed for some other reason (refused, unresolvable, etc. — "none
//! returned parseable output"), and `ok` otherwise; `loss_percent` is
//! the fraction of the 3 attempts that did not succeed, and
//! `latency_ms` is the mean of the attempts that did.

use crate::models::{PingResult, PingStatus, PingTargetConfig};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

const PROBE_DEADLINE: Duration = Duration::from_secs(3);
const ATTEMPTS: u32 = 3;
const PROBE_PORTS: [u16; 2] = [80, 443];

enum AttemptOutcome {
    Ok(f64),
    Timeout,
    Error,
}

pub struct ProbeRunner {
    targets: Vec<PingTargetConfig>,
}

impl ProbeRunner {
    pub fn new(targets: Vec<PingTargetConfig>) -> Self {
        Self { targets }
    }

    pub async fn run_all(&self) -> Vec<PingResult> {
        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            results.push(self.probe_one(target).await);
        }
        results
    }

    async fn probe_one(&self, target: &PingTargetConfig) -> PingResult {
        let deadline = Instant::now() + PROBE_DEADLINE;
        let mut outcomes = Vec::with_capacity(ATTEMPTS as usize);
        for _ in 0..ATTEMPTS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                outcomes.push(AttemptOutcome::Timeout);
                continue;
            }
            let per_attempt_budget = remaining / (ATTEMPTS - outcomes.len() as u32).max(1);
            outcomes.push(single_attempt(&target.host, per_attempt_budget).await);
        }

        let (latency_ms, loss_percent, status) = summarize(&outcomes);

        PingResult {
            name: target.name.clone(),
            host: target.host.clone(),
            latency_ms,
            loss_percent,
            status,
        }
    }
}

/// Reduces the per-attempt outcomes to the wire-level
/// latency/loss/status triple. `timeout` requires every attempt to
/// have timed out; `error` covers the remaining all-failed case (at
/// least one attempt failed but not purely by timeout); any success at
/// all is `ok`, with loss_percent reflecting the failed fraction.
fn summarize(outcomes: &[AttemptOutcome]) -> (Option<f64>, f32, PingStatus) {
    let successes: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| match o {
            AttemptOutcome::Ok(ms) => Some(*ms),
            _ => None,
        })
        .collect();
    let loss_percent = 100.0 * (outcomes.len() - successes.len()) as f32 / outcomes.len() as f32;
    let latency_ms = if successes.is_empty() {
        None
    } else {
        Some(successes.iter().sum::<f64>() / successes.len() as f64)
    };

    let status = if !successes.is_empty() {
        PingStatus::Ok
    } else if outcomes.iter().all(|o| matches!(o, AttemptOutcome::Timeout)) {
        PingStatus::Timeout
    } else {
        PingStatus::Error
    };

    (latency_ms, loss_percent, status)
}

/// One connect attempt against `host`, trying port 80 then 443 within
/// `budget`. Returns the round-trip time on the first successful
/// connect.
async fn single_attempt(host: &str, budget: Duration) -> AttemptOutcome {
    let started = Instant::now();
    let per_port_budget = budget / PROBE_PORTS.len() as u32;
    for port in PROBE_PORTS {
        let addr = format!("{host}:{port}");
        match tokio::time::timeout(per_port_budget, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => {
                return AttemptOutcome::Ok(started.elapsed().as_secs_f64() * 1000.0);
            }
            Ok(Err(_)) => continue,
            Err(_) => return AttemptOutcome::Timeout,
        }
    }
    AttemptOutcome::Error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_reports_error_or_timeout() {
        let runner = ProbeRunner::new(vec![PingTargetConfig {
            name: "bogus".into(),
            host: "198.51.100.1".into(),
        }]);
        let results = runner.run_all().await;
        assert_eq!(results.len(), 1);
        assert_ne!(results[0].status, PingStatus::Ok);
        assert_eq!(results[0].loss_percent, 100.0);
    }

    #[test]
    fn all_timeouts_classify_as_timeout() {
        let outcomes = vec![
            AttemptOutcome::Timeout,
            AttemptOutcome::Timeout,
            AttemptOutcome::Timeout,
        ];
        let (latency, loss, status) = summarize(&outcomes);
        assert!(latency.is_none());
        assert_eq!(loss, 100.0);
        assert_eq!(status, PingStatus::Timeout);
    }

    #[test]
    fn mixed_failures_without_timeout_classify_as_error() {
        let outcomes = vec![AttemptOutcome::Error, AttemptOutcome::Error, AttemptOutcome::Error];
        let (latency, loss, status) = summarize(&outcomes);
        assert!(latency.is_none());
        assert_eq!(loss, 100.0);
        assert_eq!(status, PingStatus::Error);
    }

    #[test]
    fn partial_success_is_ok_with_partial_loss() {
        let outcomes = vec![
            AttemptOutcome::Ok(10.0),
            AttemptOutcome::Ok(20.0),
            AttemptOutcome::Timeout,
        ];
        let (latency, loss, status) = summarize(&outcomes);
        assert_eq!(latency, Some(15.0));
        assert!((loss - 33.333336).abs() < 0.01);
        assert_eq!(status, PingStatus::Ok);
    }
}
