//! Server configuration file.
//!
//! ```toml
//! [storage]
//! data_dir = "/var/lib/aquafarm"
//!
//! [ledger]
//! lock_timeout_ms = 5000
//! page_size = 200
//! auto_close_on_depletion = true
//!
//! [auth.tokens]
//! "ops-token" = ["stock:*"]
//! "report-token" = ["stock:ledger:read"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stock::LedgerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the database.
    #[serde(default)]
    pub data_dir: String,
    /// Explicit SQLite file; defaults to `{data_dir}/aquafarm.sqlite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,
}

/// Static bearer-token grants. With no tokens configured every request is
/// allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, Vec<String>>,
}

impl ServerConfig {
    /// A bare name resolves to `/etc/aquafarm/<name>.toml`; anything that
    /// looks like a path is used as is.
    pub fn resolve_path(name_or_path: &str) -> PathBuf {
        if name_or_path.contains('/') || name_or_path.contains('.') {
            PathBuf::from(name_or_path)
        } else {
            PathBuf::from("/etc/aquafarm").join(format!("{name_or_path}.toml"))
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        Ok(toml::from_str(&content)?)
    }

    pub fn verify(&self) -> anyhow::Result<()> {
        if self.storage.data_dir.is_empty() && self.storage.sqlite_path.is_none() {
            anyhow::bail!("[storage] needs data_dir or sqlite_path");
        }
        if self.ledger.page_size == 0 {
            anyhow::bail!("[ledger] page_size must be positive");
        }
        for (token, grants) in &self.auth.tokens {
            if grants.is_empty() {
                anyhow::bail!("[auth.tokens] token {token:?} has no grants");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_context_name() {
        assert_eq!(
            ServerConfig::resolve_path("farm"),
            PathBuf::from("/etc/aquafarm/farm.toml")
        );
        assert_eq!(
            ServerConfig::resolve_path("./dev.toml"),
            PathBuf::from("./dev.toml")
        );
    }

    #[test]
    fn parse_full_file() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            [storage]
            data_dir = "/tmp/aquafarm"

            [ledger]
            lock_timeout_ms = 250

            [auth.tokens]
            "ops" = ["stock:*"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.storage.data_dir, "/tmp/aquafarm");
        assert_eq!(cfg.ledger.lock_timeout_ms, 250);
        assert_eq!(cfg.ledger.page_size, 200);
        assert!(cfg.ledger.auto_close_on_depletion);
        assert_eq!(cfg.auth.tokens["ops"], vec!["stock:*".to_string()]);
        cfg.verify().unwrap();
    }

    #[test]
    fn verify_rejects_missing_storage() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert!(cfg.verify().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("farm.toml");
        std::fs::write(&path, "[storage]\ndata_dir = \"/data\"\n").unwrap();
        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.storage.data_dir, "/data");
        assert!(ServerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
