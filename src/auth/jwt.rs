//! Session token handler
//! Mission: Issue and validate the JWT a dashboard carries for the rest
//! of its admin-API calls, implementing `issueSessionToken` /
//! `validateSessionToken`.

use crate::auth::models::{DashboardClaims, SessionRole};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use tracing::{debug, info};

pub struct JwtHandler {
    secret: RwLock<String>,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self {
            secret: RwLock::new(secret),
            expiration_hours: 24,
        }
    }

    /// Replaces the signing secret, invalidating every session token
    /// issued before this call. Used by the admin password reset
    /// endpoint when the caller asks to rotate it.
    pub fn rotate_secret(&self, new_secret: String) {
        *self.secret.write() = new_secret;
        info!("jwt signing secret rotated");
    }

    pub fn issue_session_token(&self, role: SessionRole) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("invalid timestamp")?
            .timestamp() as usize;
        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = DashboardClaims {
            sub: role.as_str().to_string(),
            role,
            exp: expiration,
        };

        debug!(role = role.as_str(), "issuing dashboard session token");

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.read().as_bytes()),
        )
        .context("failed to sign session token")?;

        Ok((token, expires_in))
    }

    pub fn validate_session_token(&self, token: &str) -> Result<DashboardClaims> {
        let decoded = decode::<DashboardClaims>(
            token,
            &DecodingKey::from_secret(self.secret.read().as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired session token")?;

        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_and_validates_token() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let (token, expires_in) = handler.issue_session_token(SessionRole::Admin).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 24 * 3600);

        let claims = handler.validate_session_token(&token).unwrap();
        assert_eq!(claims.role, SessionRole::Admin);
    }

    #[test]
    fn invalid_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        assert!(handler.validate_session_token("invalid.token.here").is_err());
    }

    #[test]
    fn different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1".to_string());
        let handler2 = JwtHandler::new("secret2".to_string());
        let (token, _) = handler1.issue_session_token(SessionRole::Viewer).unwrap();
        assert!(handler2.validate_session_token(&token).is_err());
    }

    #[test]
    fn expiration_is_in_the_future() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let (token, _) = handler.issue_session_token(SessionRole::Viewer).unwrap();
        let claims = handler.validate_session_token(&token).unwrap();
        assert!(claims.exp > Utc::now().timestamp() as usize);
    }
}
