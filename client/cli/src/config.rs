//! Persisted CLI configuration: server URL, realm, and credential. Grounded on the
//! teacher's `client/cli/src/config.rs` `ProjectDirs` + toml persistence idiom, trimmed of
//! the sync-daemon-specific fields (`grpc_url`, `sync_root`) that no longer apply.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub server_url: Option<String>,
    /// The realm this CLI acts as by default (`usr_<id>` or a `@me`/`~` alias resolved
    /// server-side), set on login.
    pub realm: Option<String>,
    /// Bearer token for a user or agent credential. Absent when authenticating purely via
    /// a ticket id passed on the command line.
    pub token: Option<String>,
    /// Name of the depot `tangle put`/`tangle get` act on when no `--depot` flag is given.
    pub default_depot: Option<String>,
}

impl Config {
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "entanglement", "tangle")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn require_auth(&self) -> anyhow::Result<()> {
        if self.token.is_none() {
            anyhow::bail!("Not logged in. Run: tangle login");
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.token.is_some() && self.realm.is_some()
    }

    pub fn require_server_url(&self) -> anyhow::Result<String> {
        self.server_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No server configured. Run: tangle login --server <url> ..."))
    }

    pub fn require_realm(&self) -> anyhow::Result<String> {
        self.realm
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No realm configured. Run: tangle login"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_not_configured() {
        assert!(!Config::default().is_configured());
    }

    #[test]
    fn configured_requires_server_token_and_realm() {
        let config = Config {
            server_url: Some("http://localhost:8080".to_string()),
            realm: Some("usr_1".to_string()),
            token: Some("abc".to_string()),
            default_depot: None,
        };
        assert!(config.is_configured());
    }

    #[test]
    fn require_auth_fails_without_a_token() {
        assert!(Config::default().require_auth().is_err());
    }
}
