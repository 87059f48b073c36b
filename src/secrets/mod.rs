//! Secret Manager (C3, §3 SecretStore, §4.3): resolves
//! `{{ secret:<store>:<key> }}` references against pluggable stores.

pub mod crypto;

use crate::audit::{AuditEvent, AuditLevel, AuditLogger};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

static SECRET_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*secret:([^:}\s]+)(?::([^}\s]+))?\s*\}\}").unwrap());

const DEFAULT_STORE: &str = "file";

/// A named backend capable of storing and retrieving secret values.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Directory-backed store: `<dir>/<key>.secret`, AES-256-GCM-encrypted
/// when an encryption key is configured, plaintext otherwise.
pub struct FileStore {
    dir: PathBuf,
    key: Option<[u8; 32]>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, key: Option<[u8; 32]>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { dir, key })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.secret"))
    }
}

impl SecretStore for FileStore {
    fn get(&self, key: &str) -> Result<String> {
        let path = self.path_for(key);
        let raw = fs::read_to_string(&path)
            .map_err(|_| Error::SecretError(format!("secret '{key}' not found")))?;
        match &self.key {
            Some(k) => {
                let bytes = crypto::decrypt(raw.trim(), k)?;
                String::from_utf8(bytes)
                    .map_err(|e| Error::SecretError(format!("secret '{key}' is not valid utf-8: {e}")))
            }
            None => Ok(raw.trim().to_string()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let content = match &self.key {
            Some(k) => crypto::encrypt(value.as_bytes(), k)?,
            None => value.to_string(),
        };
        fs::write(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

/// Read-only store backed by `<prefix><UPPER(key)>` environment variables.
pub struct EnvStore {
    prefix: String,
}

impl EnvStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl SecretStore for EnvStore {
    fn get(&self, key: &str) -> Result<String> {
        let var = format!("{}{}", self.prefix, key.to_uppercase());
        std::env::var(&var).map_err(|_| Error::SecretError(format!("env var '{var}' not set")))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(Error::SecretError("env store is read-only".to_string()))
    }
}

/// Declared but not required by this spec: a placeholder for an external
/// vault integration, wired the same way as the other stores.
pub struct VaultStore;

impl SecretStore for VaultStore {
    fn get(&self, _key: &str) -> Result<String> {
        Err(Error::SecretError("vault store is not configured".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(Error::SecretError("vault store is not configured".to_string()))
    }
}

/// Coordinates named secret stores, resolves `{{ secret:... }}`
/// references, and emits an audit event for every `get`.
pub struct SecretManager {
    stores: RwLock<HashMap<String, Box<dyn SecretStore>>>,
    audit: Arc<AuditLogger>,
}

/// One entry of a playbook's `spec.secrets` map (§3 SecretStore).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
struct SecretStoreDecl {
    #[serde(rename = "type")]
    store_type: String,
    #[serde(default)]
    config: SecretStoreDeclConfig,
    #[serde(default)]
    encryption: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct SecretStoreDeclConfig {
    dir: Option<PathBuf>,
    prefix: Option<String>,
}

impl SecretManager {
    pub fn new(audit: Arc<AuditLogger>) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            audit,
        }
    }

    pub fn register(&self, name: impl Into<String>, store: Box<dyn SecretStore>) {
        self.stores.write().unwrap().insert(name.into(), store);
    }

    /// Registers the named stores a playbook declares in `spec.secrets`
    /// (§3 SecretStore: `{type, config, encryption?}`), adding to or
    /// overriding the process-wide defaults for the duration of this run.
    /// `base_dir` anchors relative `config.dir` paths (the configured
    /// secrets directory); unknown `type`s are rejected.
    pub fn configure_from_spec(
        &self,
        declared: &IndexMap<String, serde_json::Value>,
        base_dir: &Path,
        key: Option<[u8; 32]>,
    ) -> Result<()> {
        for (name, raw) in declared {
            let decl: SecretStoreDecl = serde_json::from_value(raw.clone()).map_err(|e| Error::InvalidConfig {
                key: format!("spec.secrets.{name}"),
                message: e.to_string(),
            })?;
            let store: Box<dyn SecretStore> = match decl.store_type.as_str() {
                "file" => {
                    let dir = decl.config.dir.unwrap_or_else(|| base_dir.join(name));
                    let encryption_key = if decl.encryption { key } else { None };
                    Box::new(FileStore::new(dir, encryption_key)?)
                }
                "env" => Box::new(EnvStore::new(decl.config.prefix.unwrap_or_default())),
                "vault" => Box::new(VaultStore),
                other => {
                    return Err(Error::InvalidConfig {
                        key: format!("spec.secrets.{name}.type"),
                        message: format!("unknown secret store type '{other}'"),
                    })
                }
            };
            self.register(name.clone(), store);
        }
        Ok(())
    }

    /// Fetches `key` from `store`, emitting `secret.access` (INFO on
    /// success, WARNING on failure) carrying only the store and key.
    pub fn get(&self, store: &str, key: &str, user: &str) -> Result<String> {
        let stores = self.stores.read().unwrap();
        let backend = stores
            .get(store)
            .ok_or_else(|| Error::SecretError(format!("unknown secret store '{store}'")))?;

        let result = backend.get(key);
        let event = AuditEvent::new("secret.access", user)
            .with_target(key)
            .with_detail("store", store);
        let event = match &result {
            Ok(_) => event,
            Err(e) => event.with_level(AuditLevel::Warning).failure(e.to_string()),
        };
        let _ = self.audit.log(&event);
        result
    }

    pub fn set(&self, store: &str, key: &str, value: &str, user: &str) -> Result<()> {
        let stores = self.stores.read().unwrap();
        let backend = stores
            .get(store)
            .ok_or_else(|| Error::SecretError(format!("unknown secret store '{store}'")))?;
        let result = backend.set(key, value);
        let event = AuditEvent::new("secret.write", user).with_target(key).with_detail("store", store);
        let event = match &result {
            Ok(_) => event,
            Err(e) => event.with_level(AuditLevel::Warning).failure(e.to_string()),
        };
        let _ = self.audit.log(&event);
        result
    }

    /// Walks `{{ secret:<store>:<key> }}` / `{{ secret:<key> }}`
    /// references in `text`, substituting resolved values. Failures are
    /// non-fatal: they yield the opaque `{{ SECRET_ERROR:<key> }}` token
    /// and an audit event, never halting the caller (§3, §7).
    pub fn resolve_all(&self, text: &str, user: &str) -> String {
        SECRET_REF
            .replace_all(text, |caps: &regex::Captures| {
                let (store, key) = match (caps.get(1), caps.get(2)) {
                    (Some(store_or_key), Some(key)) => (store_or_key.as_str(), key.as_str()),
                    (Some(key), None) => (DEFAULT_STORE, key.as_str()),
                    _ => (DEFAULT_STORE, ""),
                };
                match self.get(store, key, user) {
                    Ok(value) => value,
                    Err(_) => format!("{{{{ SECRET_ERROR:{key} }}}}"),
                }
            })
            .into_owned()
    }
}
