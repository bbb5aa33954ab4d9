//! Identity & credential verification
//! Mission: The two credential checks the system performs —
//! `verifyAgentCredential` for an ingesting agent's shared token, and
//! `verifyDashboardCredential` for the admin password a dashboard logs
//! in with.

use crate::auth::models::SessionRole;
use bcrypt::verify as bcrypt_verify;

/// Constant-time comparison so token length/content never leaks through
/// timing, matching the teacher's reach for `bcrypt`/`hmac`-backed
/// comparisons elsewhere in the auth stack rather than `==` on secrets.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Checks an agent's shared token against the process-wide configured
/// value. There is exactly one agent token per deployment; identity
/// comes from the `server_id` the agent registers with, not from the
/// token.
pub fn verify_agent_credential(configured_token: &str, presented_token: &str) -> bool {
    constant_time_eq(configured_token, presented_token)
}

/// Checks a dashboard login attempt against the configured admin
/// password hash. Returns the role to grant on success.
pub fn verify_dashboard_credential(admin_password_hash: &str, presented_password: &str) -> bool {
    bcrypt_verify(presented_password, admin_password_hash).unwrap_or(false)
}

/// Role granted to a dashboard connection that presented no credential
/// at all, for deployments that allow public read-only access.
pub fn anonymous_role() -> SessionRole {
    SessionRole::Anonymous
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_token_must_match_exactly() {
        assert!(verify_agent_credential("secret-token", "secret-token"));
        assert!(!verify_agent_credential("secret-token", "wrong-token"));
        assert!(!verify_agent_credential("secret-token", "secret-tok"));
    }

    #[test]
    fn dashboard_credential_checks_bcrypt_hash() {
        let hash = bcrypt::hash("hunter2", bcrypt::DEFAULT_COST).unwrap();
        assert!(verify_dashboard_credential(&hash, "hunter2"));
        assert!(!verify_dashboard_credential(&hash, "wrong"));
    }
}
