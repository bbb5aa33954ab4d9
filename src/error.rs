//! Error taxonomy
//! Mission: One enum per failure kind the core distinguishes, with the
//! propagation policy fixed by the system design (local recovery for
//! everything except Unauthorized/ReadFailure/Shutdown).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Taxonomy of failures the ingest/persistence/history/fan-out planes
/// can raise. Not every variant closes a session — see the doc comment
/// on each for the propagation rule.
#[derive(Debug)]
pub enum AppError {
    /// Credential rejected. Closes the session.
    Unauthorized(String),
    /// Decode or schema failure on an agent frame. Counted, session
    /// stays open unless the per-minute rate is exceeded.
    Malformed(String),
    /// Persistence intake queue saturated. Oldest sample dropped,
    /// ingest unaffected.
    IntakeOverflow,
    /// Durable store write failed after retries. Batch dropped.
    WriteFailure(String),
    /// History query could not complete. Surfaced to the caller.
    ReadFailure(String),
    /// Dashboard subscriber exceeded the stall grace period.
    Stalled,
    /// Process-wide cancellation in progress.
    Shutdown,
    /// Anything else bubbled up via `anyhow` from a boundary call.
    Internal(anyhow::Error),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            AppError::Malformed(msg) => write!(f, "malformed sample: {msg}"),
            AppError::IntakeOverflow => write!(f, "intake queue overflow"),
            AppError::WriteFailure(msg) => write!(f, "write failure: {msg}"),
            AppError::ReadFailure(msg) => write!(f, "read failure: {msg}"),
            AppError::Stalled => write!(f, "subscriber stalled"),
            AppError::Shutdown => write!(f, "shutting down"),
            AppError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::ReadFailure(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Malformed(_) => (StatusCode::BAD_REQUEST, "malformed"),
            AppError::IntakeOverflow => (StatusCode::SERVICE_UNAVAILABLE, "intake_overflow"),
            AppError::WriteFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "write_failure"),
            AppError::ReadFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "read_failure"),
            AppError::Stalled => (StatusCode::REQUEST_TIMEOUT, "stalled"),
            AppError::Shutdown => (StatusCode::SERVICE_UNAVAILABLE, "shutdown"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        let body = json!({
            "error": kind,
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
