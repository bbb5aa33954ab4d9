//! Configuration
//! Mission: Load the static shape of a deployment (admin credential,
//! servers, group taxonomy, probe targets) from a TOML file, then layer
//! a small set of environment overrides on top.

use crate::models::{GroupDimension, GroupOption, PingTargetConfig, ServerDescriptor, SiteSettings};
use anyhow::{Context, Result};
use bcrypt::{hash, DEFAULT_COST};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "data/vigil.db".to_string()
}

fn default_presence_window_secs() -> u64 {
    30
}

/// On-disk shape of `config.toml`. Optional sections default to empty
/// so a brand-new deployment can start from a near-empty file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    pub admin_password_hash: Option<String>,
    pub jwt_secret: Option<String>,
    pub agent_token: Option<String>,
    #[serde(default = "default_presence_window_secs")]
    pub presence_window_secs: u64,
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
    #[serde(default)]
    pub group_dimensions: Vec<GroupDimension>,
    /// Pre-`group_dimensions` deployments stored a flat list of group
    /// names. Migrated into a single `group_dimensions` entry on load
    /// (§9 design note); the field itself is never written back.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub ping_targets: Vec<PingTargetConfig>,
    /// Descriptor for the reserved `local` identity, per §6's
    /// `local_node` config option. `None` means the `local` LiveEntry
    /// starts with no descriptor attached, not that it doesn't exist.
    #[serde(default)]
    pub local_node: Option<ServerDescriptor>,
    #[serde(default)]
    pub site_settings: SiteSettings,
    #[serde(default)]
    pub allow_anonymous_dashboards: bool,
    /// Opaque to the core — human-auth OAuth configuration consumed by
    /// the (out-of-scope) admin web frontend, round-tripped verbatim.
    #[serde(default)]
    pub oauth: Option<serde_json::Value>,
}

/// The single legacy `GroupDimension` id/name every pre-migration
/// `groups` entry is folded into.
const LEGACY_GROUP_DIMENSION_ID: &str = "group";

fn migrate_legacy_groups(legacy: &[String]) -> GroupDimension {
    GroupDimension {
        id: LEGACY_GROUP_DIMENSION_ID.to_string(),
        name: "Group".to_string(),
        options: legacy
            .iter()
            .map(|g| GroupOption {
                id: g.clone(),
                label: g.clone(),
            })
            .collect(),
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            admin_password_hash: None,
            jwt_secret: None,
            agent_token: None,
            presence_window_secs: default_presence_window_secs(),
            servers: Vec::new(),
            group_dimensions: Vec::new(),
            groups: Vec::new(),
            ping_targets: Vec::new(),
            local_node: None,
            site_settings: SiteSettings::default(),
            allow_anonymous_dashboards: false,
            oauth: None,
        }
    }
}

/// Resolved, process-wide configuration. Immutable after startup;
/// mutable deployment state (descriptors, group taxonomy) lives in the
/// Live State Store / admin API instead, seeded from here once.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub admin_password_hash: String,
    pub jwt_secret: String,
    pub agent_token: String,
    pub presence_window_secs: u64,
    pub servers: Vec<ServerDescriptor>,
    pub group_dimensions: Vec<GroupDimension>,
    pub ping_targets: Vec<PingTargetConfig>,
    pub local_node: Option<ServerDescriptor>,
    pub site_settings: SiteSettings,
    pub allow_anonymous_dashboards: bool,
    pub oauth: Option<serde_json::Value>,
}

impl Config {
    /// Loads `path` if it exists, applies env overrides, and fills in
    /// generated defaults (a random agent token / jwt secret) when the
    /// file leaves them unset so a fresh checkout still boots.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<ConfigFile>(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            ConfigFile::default()
        };

        let port = std::env::var("VIGIL_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(file.port);

        let db_path = std::env::var("VIGIL_DB_PATH")
            .unwrap_or(file.db_path)
            .into();

        let admin_password_hash = match file.admin_password_hash.clone() {
            Some(configured) => configured,
            None => {
                let generated =
                    hash("admin123", DEFAULT_COST).context("hashing default admin password")?;
                info!("default admin user created (username: admin, password: admin123)");
                generated
            }
        };

        let jwt_secret = std::env::var("VIGIL_JWT_SECRET")
            .ok()
            .or(file.jwt_secret)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let agent_token = std::env::var("VIGIL_AGENT_TOKEN")
            .ok()
            .or(file.agent_token)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let group_dimensions = if file.group_dimensions.is_empty() && !file.groups.is_empty() {
            vec![migrate_legacy_groups(&file.groups)]
        } else {
            file.group_dimensions
        };

        Ok(Self {
            port,
            db_path,
            admin_password_hash,
            jwt_secret,
            agent_token,
            presence_window_secs: file.presence_window_secs,
            servers: file.servers,
            group_dimensions,
            ping_targets: file.ping_targets,
            local_node: file.local_node,
            site_settings: file.site_settings,
            allow_anonymous_dashboards: file.allow_anonymous_dashboards,
            oauth: file.oauth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.jwt_secret.is_empty());
        assert!(!cfg.agent_token.is_empty());
        assert!(cfg.local_node.is_none());
    }

    #[test]
    fn missing_admin_password_hash_falls_back_to_runtime_hashed_default() {
        let cfg = Config::load("/nonexistent/path/config.toml").unwrap();
        assert!(bcrypt::verify("admin123", &cfg.admin_password_hash).unwrap());
    }

    #[test]
    fn local_node_descriptor_is_read_from_config_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
            [local_node]
            server_id = "local"
            server_name = "This Host"
            "#
        )
        .unwrap();
        let cfg = Config::load(tmp.path()).unwrap();
        let local_node = cfg.local_node.expect("local_node must be parsed");
        assert_eq!(local_node.server_name, "This Host");
    }

    #[test]
    fn file_values_are_honored() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
            port = 9191
            db_path = "test.db"
            agent_token = "fixed-token"
            "#
        )
        .unwrap();
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.port, 9191);
        assert_eq!(cfg.db_path, PathBuf::from("test.db"));
        assert_eq!(cfg.agent_token, "fixed-token");
    }
}
