//! Admin HTTP handlers.
//! Mission: Descriptor/group/ping-target/site-settings management, the
//! password login, and credential rotation — the thin authenticated
//! surface a human operator (or the admin frontend) drives.

use crate::admin::models::{
    GroupDimensionsRequest, PingTargetsRequest, ResetCredentialsRequest,
    ResetCredentialsResponse, SiteSettingsRequest, UpsertDescriptorRequest, VerifyResponse,
};
use crate::auth::models::{DashboardClaims, LoginRequest, LoginResponse};
use crate::auth::{verify_dashboard_credential, SessionRole};
use crate::models::ServerIdentity;
use crate::state::AppState;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bcrypt::{hash, DEFAULT_COST};
use tracing::{info, warn};

#[derive(Debug)]
pub enum AdminApiError {
    InvalidCredentials,
    Forbidden,
    Internal(String),
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "invalid password".to_string())
            }
            AdminApiError::Forbidden => (StatusCode::FORBIDDEN, "admin role required".to_string()),
            AdminApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Every admin route below runs behind `auth::middleware::auth_middleware`,
/// which rejects a missing/invalid token before a handler ever sees the
/// request; this only narrows the already-valid session to the `Admin`
/// role required for these mutating/introspection endpoints.
fn require_admin(claims: &DashboardClaims) -> Result<(), AdminApiError> {
    if !claims.role.can_administer() {
        return Err(AdminApiError::Forbidden);
    }
    Ok(())
}

/// POST /api/admin/login — mints a session token from the admin
/// password. Not gated by `auth_middleware` itself (there is no token
/// yet); every other admin route is.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AdminApiError> {
    let hash = state.admin.admin_password_hash.read().clone();
    if !verify_dashboard_credential(&hash, &payload.password) {
        warn!("failed admin login attempt");
        return Err(AdminApiError::InvalidCredentials);
    }

    let (token, expires_in) = state
        .jwt
        .issue_session_token(SessionRole::Admin)
        .map_err(|e| AdminApiError::Internal(e.to_string()))?;

    info!("admin login succeeded");
    Ok(Json(LoginResponse {
        token,
        expires_in,
        role: SessionRole::Admin,
    }))
}

/// GET /api/admin/verify — confirms the caller's session token is
/// still valid and reports the role it carries.
pub async fn verify(
    Extension(claims): Extension<DashboardClaims>,
) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        role: claims.role,
        sub: claims.sub,
    })
}

/// GET /api/admin/descriptors
pub async fn list_descriptors(
    State(state): State<AppState>,
    Extension(claims): Extension<DashboardClaims>,
) -> Result<Json<Vec<serde_json::Value>>, AdminApiError> {
    require_admin(&claims)?;
    let raw = state
        .writer
        .load_descriptors()
        .map_err(|e| AdminApiError::Internal(e.to_string()))?;
    let parsed = raw
        .into_iter()
        .filter_map(|s| serde_json::from_str(&s).ok())
        .collect();
    Ok(Json(parsed))
}

/// PUT /api/admin/descriptors — upserts one descriptor, applied to the
/// Live State Store immediately and persisted for restart durability.
pub async fn upsert_descriptor(
    State(state): State<AppState>,
    Extension(claims): Extension<DashboardClaims>,
    Json(payload): Json<UpsertDescriptorRequest>,
) -> Result<StatusCode, AdminApiError> {
    require_admin(&claims)?;
    let descriptor = payload.descriptor;
    let payload_json = serde_json::to_string(&descriptor)
        .map_err(|e| AdminApiError::Internal(e.to_string()))?;
    state
        .writer
        .put_descriptor(descriptor.server_id.as_str(), &payload_json)
        .map_err(|e| AdminApiError::Internal(e.to_string()))?;
    state.live.set_descriptor(descriptor);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/admin/descriptors/:id — removes the identity entirely
/// from the Live State Store (historical buckets are left for the
/// retention sweeper to age out on its own schedule).
pub async fn remove_descriptor(
    State(state): State<AppState>,
    Extension(claims): Extension<DashboardClaims>,
    Path(server_id): Path<String>,
) -> Result<StatusCode, AdminApiError> {
    require_admin(&claims)?;
    state.live.remove(&ServerIdentity::from(server_id));
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/admin/group-dimensions
pub async fn set_group_dimensions(
    State(state): State<AppState>,
    Extension(claims): Extension<DashboardClaims>,
    Json(payload): Json<GroupDimensionsRequest>,
) -> Result<StatusCode, AdminApiError> {
    require_admin(&claims)?;
    *state.admin.group_dimensions.write() = payload.group_dimensions;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/admin/ping-targets — the updated list takes effect on the
/// next frame forwarded to agents and the next local-collector tick.
pub async fn set_ping_targets(
    State(state): State<AppState>,
    Extension(claims): Extension<DashboardClaims>,
    Json(payload): Json<PingTargetsRequest>,
) -> Result<StatusCode, AdminApiError> {
    require_admin(&claims)?;
    *state.admin.ping_targets.write() = payload.ping_targets;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/admin/site-settings — pushed to every connected dashboard
/// via the `site_settings` watch channel.
pub async fn set_site_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<DashboardClaims>,
    Json(payload): Json<SiteSettingsRequest>,
) -> Result<StatusCode, AdminApiError> {
    require_admin(&claims)?;
    let settings = payload.settings;
    *state.admin.site_settings.write() = settings.clone();
    let _ = state.admin.site_settings_tx.send(settings);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/reset-credentials
pub async fn reset_credentials(
    State(state): State<AppState>,
    Extension(claims): Extension<DashboardClaims>,
    Json(payload): Json<ResetCredentialsRequest>,
) -> Result<Json<ResetCredentialsResponse>, AdminApiError> {
    require_admin(&claims)?;
    let new_hash = hash(&payload.new_password, DEFAULT_COST)
        .map_err(|e| AdminApiError::Internal(e.to_string()))?;
    *state.admin.admin_password_hash.write() = new_hash;

    if payload.rotate_jwt_secret {
        state.jwt.rotate_secret(uuid::Uuid::new_v4().to_string());
    }

    info!(
        rotated_jwt = payload.rotate_jwt_secret,
        "admin credentials reset"
    );
    Ok(Json(ResetCredentialsResponse {
        ok: true,
        jwt_secret_rotated: payload.rotate_jwt_secret,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_api_error_responses_are_mapped() {
        assert_eq!(
            AdminApiError::InvalidCredentials.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AdminApiError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AdminApiError::Internal("x".into())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn require_admin_rejects_non_admin_role() {
        let claims = DashboardClaims {
            sub: "viewer".into(),
            role: crate::auth::SessionRole::Viewer,
            exp: 0,
        };
        assert!(matches!(
            require_admin(&claims),
            Err(AdminApiError::Forbidden)
        ));
    }
}
