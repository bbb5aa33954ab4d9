//! HTTP middleware
//! Mission: Cross-cutting concerns for the admin HTTP surface and the
//! agent/dashboard WebSocket upgrades — request logging and per-IP rate
//! limiting, independent of the telemetry planes themselves.

pub mod logging;
pub mod rate_limit;

pub use logging::{request_logging, request_logging_simple};
pub use rate_limit::{RateLimitConfig, RateLimitLayer};
