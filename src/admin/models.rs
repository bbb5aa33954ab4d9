//! Admin API request/response shapes.

use crate::auth::SessionRole;
use crate::models::{GroupDimension, PingTargetConfig, ServerDescriptor, SiteSettings};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct UpsertDescriptorRequest {
    #[serde(flatten)]
    pub descriptor: ServerDescriptor,
}

#[derive(Debug, Deserialize)]
pub struct GroupDimensionsRequest {
    pub group_dimensions: Vec<GroupDimension>,
}

#[derive(Debug, Deserialize)]
pub struct PingTargetsRequest {
    pub ping_targets: Vec<PingTargetConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SiteSettingsRequest {
    #[serde(flatten)]
    pub settings: SiteSettings,
}

/// Resets the admin password to `new_password` and, when
/// `rotate_jwt_secret` is set, replaces the signing secret so every
/// session token issued before this call is invalidated.
#[derive(Debug, Deserialize)]
pub struct ResetCredentialsRequest {
    pub new_password: String,
    #[serde(default)]
    pub rotate_jwt_secret: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetCredentialsResponse {
    pub ok: bool,
    pub jwt_secret_rotated: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub role: SessionRole,
    pub sub: String,
}
