//! Authentication
//! Mission: Two credential paths — an agent's shared ingest token, and
//! a dashboard admin's password-derived JWT session — plus the axum
//! middleware that enforces the latter on the admin HTTP surface.

pub mod identity;
pub mod jwt;
pub mod middleware;
pub mod models;

pub use identity::{anonymous_role, verify_agent_credential, verify_dashboard_credential};
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::{DashboardClaims, SessionRole};
