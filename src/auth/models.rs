//! Authentication models
//! Mission: The session role carried by a dashboard JWT, and the
//! request/response shapes around the admin login endpoint.

use serde::{Deserialize, Serialize};

/// Access level granted to a dashboard session. `Anonymous` is the
/// implicit role for an unauthenticated viewer on a site that allows
/// public read access; it never carries a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Admin,
    Viewer,
    Anonymous,
}

impl SessionRole {
    pub fn as_str(&self) -> &str {
        match self {
            SessionRole::Admin => "admin",
            SessionRole::Viewer => "viewer",
            SessionRole::Anonymous => "anonymous",
        }
    }

    pub fn can_administer(&self) -> bool {
        matches!(self, SessionRole::Admin)
    }
}

/// JWT claims payload for a dashboard session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardClaims {
    pub sub: String,
    pub role: SessionRole,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize,
    pub role: SessionRole,
}
