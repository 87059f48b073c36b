//! Layered configuration: built-in defaults → optional config file →
//! environment overrides (§10.3).

use crate::error::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the data directory (`audit/`, `secrets/`, `rbac/` live under it).
    pub data_dir: PathBuf,

    /// Audit logger settings.
    pub audit: AuditConfig,

    /// Secret manager settings.
    pub secrets: SecretsConfig,

    /// Container runtime preference order, tried in listed order.
    pub runtime_preference: Vec<String>,

    /// Execution target used when a playbook does not pin one.
    pub default_target: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            audit: AuditConfig::default(),
            secrets: SecretsConfig::default(),
            runtime_preference: vec!["docker".to_string(), "podman".to_string()],
            default_target: "local".to_string(),
        }
    }
}

/// Audit logger file-rotation and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Rotate a day's audit file once it exceeds this size, in bytes.
    pub max_file_size_bytes: u64,

    /// Delete audit files whose mtime is older than this many days.
    pub retention_days: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            retention_days: 90,
        }
    }
}

/// Secret manager encryption-key source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Path to a key file, used when `PTX_ENCRYPTION_KEY` is not set.
    pub key_file: Option<PathBuf>,

    /// Prefix used by the env-backed secret store (`PTX_SECRET_` by default).
    pub env_prefix: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            env_prefix: "PTX_SECRET_".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ptx-ansible")
}

impl Config {
    /// Loads configuration from an optional file, then applies environment
    /// overrides. Never panics on a missing file; only on a malformed one.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                config = config.merge_from_file(path)?;
            }
        } else {
            for candidate in Self::default_search_paths() {
                if candidate.exists() {
                    config = config.merge_from_file(&candidate)?;
                    break;
                }
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var("PTX_ANSIBLE_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".ptx-ansible.toml"));
        }
        paths.push(PathBuf::from("ptx-ansible.toml"));
        paths
    }

    fn merge_from_file(&self, path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{}'", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        Ok(file_config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("PTX_ANSIBLE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(size) = std::env::var("PTX_ANSIBLE_AUDIT_MAX_SIZE") {
            if let Ok(n) = size.parse() {
                self.audit.max_file_size_bytes = n;
            }
        }
        if let Ok(days) = std::env::var("PTX_ANSIBLE_AUDIT_RETENTION_DAYS") {
            if let Ok(n) = days.parse() {
                self.audit.retention_days = n;
            }
        }
        if let Ok(target) = std::env::var("PTX_ANSIBLE_DEFAULT_TARGET") {
            self.default_target = target;
        }
        if std::env::var("PTX_ENCRYPTION_KEY").is_err() {
            if let Ok(key_file) = std::env::var("PTX_ENCRYPTION_KEY_FILE") {
                self.secrets.key_file = Some(PathBuf::from(key_file));
            }
        }
    }

    /// Directory under `data_dir` holding the audit log files (§6).
    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }

    /// Directory under `data_dir` holding the file secret store (§6).
    pub fn secrets_dir(&self) -> PathBuf {
        self.data_dir.join("secrets")
    }

    /// Directory under `data_dir` holding the RBAC data store (§6).
    pub fn rbac_dir(&self) -> PathBuf {
        self.data_dir.join("rbac")
    }

    /// Validates the loaded configuration, surfacing an `InvalidConfig`
    /// error for values that cannot be acted on.
    pub fn validate(&self) -> Result<()> {
        if self.audit.max_file_size_bytes == 0 {
            return Err(Error::InvalidConfig {
                key: "audit.max_file_size_bytes".into(),
                message: "must be greater than zero".into(),
            });
        }
        if !["local", "container", "virt"].contains(&self.default_target.as_str()) {
            return Err(Error::InvalidConfig {
                key: "default_target".into(),
                message: format!("unknown target '{}'", self.default_target),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_target, "local");
        assert_eq!(config.runtime_preference, vec!["docker", "podman"]);
    }

    #[test]
    fn load_with_missing_explicit_path_does_not_panic() {
        let missing = PathBuf::from("/nonexistent/ptx-ansible.toml");
        let config = Config::load(Some(&missing)).unwrap();
        assert_eq!(config.default_target, "local");
    }

    #[test]
    fn env_override_changes_default_target() {
        std::env::set_var("PTX_ANSIBLE_DEFAULT_TARGET", "container");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.default_target, "container");
        std::env::remove_var("PTX_ANSIBLE_DEFAULT_TARGET");
    }

    #[test]
    fn invalid_target_fails_validation() {
        let mut config = Config::default();
        config.default_target = "quantum".into();
        assert!(config.validate().is_err());
    }
}
