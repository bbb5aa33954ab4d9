//! Sample codec
//! Mission: Turn agent-supplied JSON into a validated `Sample`, rejecting
//! anything malformed before it reaches the Live State Store or the
//! persistence intake queue.

use crate::models::Sample;
use std::fmt;

#[derive(Debug)]
pub enum CodecError {
    Decode(serde_json::Error),
    Invalid(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Decode(err) => write!(f, "decode error: {err}"),
            CodecError::Invalid(reason) => write!(f, "invalid sample: {reason}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Decode(err)
    }
}

/// Decodes and validates a raw agent frame body in one step. Callers
/// never see a `Sample` that failed validation.
pub fn decode_sample(value: &serde_json::Value) -> Result<Sample, CodecError> {
    let sample: Sample = serde_json::from_value(value.clone())?;
    sample.validate()?;
    Ok(sample)
}

impl Sample {
    /// Structural and range checks that `serde` alone cannot express —
    /// negative-as-unsigned fields already fail at decode time, so this
    /// only needs to catch values that decode cleanly but are nonsense.
    pub fn validate(&self) -> Result<(), CodecError> {
        if !(0.0..=100.0).contains(&self.cpu.usage_percent) {
            return Err(CodecError::Invalid("cpu.usage_percent out of [0, 100]"));
        }
        for core in &self.cpu.per_core_percent {
            if !(0.0..=100.0).contains(core) {
                return Err(CodecError::Invalid("cpu.per_core_percent out of [0, 100]"));
            }
        }
        if self.cpu.core_count == 0 {
            return Err(CodecError::Invalid("cpu.core_count must be nonzero"));
        }
        if self.memory.used_bytes > self.memory.total_bytes {
            return Err(CodecError::Invalid("memory.used_bytes exceeds total_bytes"));
        }
        if !(0.0..=100.0).contains(&self.memory.used_percent) {
            return Err(CodecError::Invalid("memory.used_percent out of [0, 100]"));
        }
        for disk in &self.disks {
            if disk.used_bytes > disk.total_bytes {
                return Err(CodecError::Invalid("disk.used_bytes exceeds total_bytes"));
            }
            if !(0.0..=100.0).contains(&disk.used_percent) {
                return Err(CodecError::Invalid("disk.used_percent out of [0, 100]"));
            }
        }
        for gpu in &self.gpu {
            if gpu.memory_used_bytes > gpu.memory_total_bytes {
                return Err(CodecError::Invalid("gpu.memory_used_bytes exceeds memory_total_bytes"));
            }
        }
        for ping in &self.ping {
            if !(0.0..=100.0).contains(&ping.loss_percent) {
                return Err(CodecError::Invalid("ping.loss_percent out of [0, 100]"));
            }
        }
        Ok(())
    }
}

/// One decoded agent frame, distinguishing a registration handshake, a
/// telemetry push, and an empty keep-alive. The wire contract (§6) is
/// compatibility-sensitive and fixes this by structural shape rather
/// than an explicit discriminant field: `{"auth": ..., "hint"?: ...}`
/// for registration, `{}` for a heartbeat, anything else is a Sample.
#[derive(Debug, Clone)]
pub enum AgentFrame {
    Register { token: String, hint: Option<String> },
    Sample(Box<Sample>),
    Heartbeat,
}

/// Parses one raw agent frame per the §6 wire contract.
pub fn parse_agent_frame(value: &serde_json::Value) -> Result<AgentFrame, CodecError> {
    if let Some(obj) = value.as_object() {
        if let Some(token) = obj.get("auth").and_then(|v| v.as_str()) {
            let hint = obj
                .get("hint")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            return Ok(AgentFrame::Register {
                token: token.to_string(),
                hint,
            });
        }
        if obj.is_empty() {
            return Ok(AgentFrame::Heartbeat);
        }
    }
    let sample = decode_sample(value)?;
    Ok(AgentFrame::Sample(Box::new(sample)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_sample_json() -> serde_json::Value {
        json!({
            "timestamp": "2026-01-01T00:00:00Z",
            "cpu": { "brand": "test", "core_count": 4, "usage_percent": 12.5, "per_core_percent": [10.0, 15.0], "frequency_mhz": 3200 },
            "memory": { "total_bytes": 1000, "used_bytes": 500, "available_bytes": 500, "swap_total_bytes": 0, "swap_used_bytes": 0, "used_percent": 50.0 },
            "disks": [],
            "network": { "interfaces": [], "total_rx_bytes": 0, "total_tx_bytes": 0 },
            "load": { "one": 0.1, "five": 0.2, "fifteen": 0.3 },
            "host": { "hostname": "h", "os_name": "linux", "os_version": "1", "kernel_version": "1", "arch": "x86_64", "uptime_secs": 10 },
            "gpu": [],
            "ping": []
        })
    }

    #[test]
    fn decodes_valid_sample() {
        let v = valid_sample_json();
        let sample = decode_sample(&v).expect("should decode");
        assert_eq!(sample.cpu.core_count, 4);
    }

    #[test]
    fn parses_register_frame() {
        let frame = parse_agent_frame(&json!({"auth": "tok123", "hint": "box-1"})).unwrap();
        match frame {
            AgentFrame::Register { token, hint } => {
                assert_eq!(token, "tok123");
                assert_eq!(hint.as_deref(), Some("box-1"));
            }
            _ => panic!("expected Register"),
        }
    }

    #[test]
    fn parses_heartbeat_frame() {
        let frame = parse_agent_frame(&json!({})).unwrap();
        assert!(matches!(frame, AgentFrame::Heartbeat));
    }

    #[test]
    fn parses_sample_frame() {
        let frame = parse_agent_frame(&valid_sample_json()).unwrap();
        assert!(matches!(frame, AgentFrame::Sample(_)));
    }

    #[test]
    fn rejects_cpu_usage_out_of_range() {
        let mut v = valid_sample_json();
        v["cpu"]["usage_percent"] = json!(150.0);
        let err = decode_sample(&v).unwrap_err();
        assert!(matches!(err, CodecError::Invalid(_)));
    }

    #[test]
    fn rejects_memory_used_exceeding_total() {
        let mut v = valid_sample_json();
        v["memory"]["used_bytes"] = json!(5000);
        let err = decode_sample(&v).unwrap_err();
        assert!(matches!(err, CodecError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut v = valid_sample_json();
        v.as_object_mut().unwrap().remove("cpu");
        let err = decode_sample(&v).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn rejects_negative_counter_at_decode_time() {
        let mut v = valid_sample_json();
        v["cpu"]["core_count"] = json!(-1);
        let err = decode_sample(&v).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
