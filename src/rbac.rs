//! RBAC Policy (C5, §3 Role/User, §4.5): evaluates
//! `(user, permission, environment, resource) → granted/denied`.

use crate::audit::{AuditEvent, AuditLevel, AuditLogger};
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// A named permission bundle, restricted by sandbox type and/or resource
/// pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by: String,
}

/// A principal that can be granted roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub enabled: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub last_login_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// An access check request.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub user: String,
    pub permission: String,
    pub environment: String,
    pub resource: String,
}

/// The result of [`RbacPolicy::check_access`].
#[derive(Debug, Clone)]
pub struct Decision {
    pub granted: bool,
    pub reason: String,
    pub required_role: Option<String>,
    pub matched_role: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RbacData {
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    roles: HashMap<String, Role>,
}

/// RBAC data store + policy evaluator, backed by a single JSON document.
pub struct RbacPolicy {
    path: PathBuf,
    data: RwLock<RbacData>,
    audit: Arc<AuditLogger>,
}

impl RbacPolicy {
    /// Loads (or seeds) the RBAC data store at `<dir>/rbac-data.json`.
    pub fn load(dir: impl Into<PathBuf>, audit: Arc<AuditLogger>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let path = dir.join("rbac-data.json");

        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            default_data()
        };

        let policy = Self {
            path,
            data: RwLock::new(data),
            audit,
        };
        policy.persist()?;
        Ok(policy)
    }

    fn persist(&self) -> Result<()> {
        let data = self.data.read().map_err(|_| Error::Internal("rbac lock poisoned".into()))?;
        let json = serde_json::to_string_pretty(&*data)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o640))?;
        }
        Ok(())
    }

    /// Adds a role to a user, persisting the change.
    pub fn grant_role(&self, username: &str, role: &str) -> Result<()> {
        {
            let mut data = self.data.write().map_err(|_| Error::Internal("rbac lock poisoned".into()))?;
            let user = data
                .users
                .get_mut(username)
                .ok_or_else(|| Error::SecretError(format!("unknown user '{username}'")))?;
            if !user.roles.iter().any(|r| r == role) {
                user.roles.push(role.to_string());
            }
        }
        self.persist()
    }

    /// Evaluates `req`, emitting an `rbac.access` audit event (CRITICAL on
    /// deny, INFO on allow).
    pub fn check_access(&self, req: &AccessRequest) -> Result<Decision> {
        let decision = self.evaluate(req)?;

        let event = AuditEvent::new("rbac.access", &req.user)
            .with_target(&req.resource)
            .with_environment(&req.environment)
            .with_detail("permission", &req.permission);
        let event = if decision.granted {
            event
        } else {
            event.with_level(AuditLevel::Critical).failure(decision.reason.clone())
        };
        let _ = self.audit.log(&event);

        Ok(decision)
    }

    fn evaluate(&self, req: &AccessRequest) -> Result<Decision> {
        let data = self.data.read().map_err(|_| Error::Internal("rbac lock poisoned".into()))?;

        let user = match data.users.get(&req.user) {
            Some(u) if u.enabled => u,
            Some(_) => {
                return Ok(Decision {
                    granted: false,
                    reason: format!("user '{}' is disabled", req.user),
                    required_role: None,
                    matched_role: None,
                })
            }
            None => {
                return Ok(Decision {
                    granted: false,
                    reason: format!("unknown user '{}'", req.user),
                    required_role: None,
                    matched_role: None,
                })
            }
        };

        for role_name in &user.roles {
            let Some(role) = data.roles.get(role_name) else {
                continue;
            };
            if !role_has_permission(role, &req.permission) {
                continue;
            }
            if !role.environment.is_empty()
                && !role.environment.iter().any(|e| e == "*" || e == &req.environment)
            {
                continue;
            }
            if !role.resources.is_empty() {
                let matches = role.resources.iter().any(|pattern| {
                    Regex::new(pattern)
                        .map(|re| re.is_match(&req.resource))
                        .unwrap_or(false)
                });
                if !matches {
                    continue;
                }
            }
            return Ok(Decision {
                granted: true,
                reason: format!("granted via role '{role_name}'"),
                required_role: None,
                matched_role: Some(role_name.clone()),
            });
        }

        Ok(Decision {
            granted: false,
            reason: format!("no role grants '{}'", req.permission),
            required_role: None,
            matched_role: None,
        })
    }
}

fn role_has_permission(role: &Role, permission: &str) -> bool {
    let domain = permission.split(':').next().unwrap_or("");
    role.permissions
        .iter()
        .any(|p| p == permission || p == &format!("{domain}:*"))
}

fn default_data() -> RbacData {
    let now = chrono::Utc::now();
    let mut roles = HashMap::new();
    roles.insert(
        "admin".to_string(),
        Role {
            name: "admin".to_string(),
            description: "Full access".to_string(),
            permissions: vec!["playbook:*".into(), "secret:*".into(), "env:*".into(), "system:*".into(), "cicd:*".into()],
            environment: vec![],
            resources: vec![],
            created_at: now,
            created_by: "system".to_string(),
        },
    );
    roles.insert(
        "developer".to_string(),
        Role {
            name: "developer".to_string(),
            description: "Read/write/execute playbooks locally or in containers".to_string(),
            permissions: vec![
                "playbook:read".into(),
                "playbook:write".into(),
                "playbook:execute".into(),
                "secret:read".into(),
                "cicd:read".into(),
                "cicd:write".into(),
            ],
            environment: vec!["local".into(), "container".into()],
            resources: vec![],
            created_at: now,
            created_by: "system".to_string(),
        },
    );
    roles.insert(
        "operator".to_string(),
        Role {
            name: "operator".to_string(),
            description: "Execute playbooks against remote VMs".to_string(),
            permissions: vec!["playbook:read".into(), "playbook:execute".into(), "secret:read".into(), "cicd:execute".into()],
            environment: vec!["virt".into()],
            resources: vec!["^(production|staging)$".into()],
            created_at: now,
            created_by: "system".to_string(),
        },
    );
    roles.insert(
        "auditor".to_string(),
        Role {
            name: "auditor".to_string(),
            description: "Read-only access plus audit queries".to_string(),
            permissions: vec!["playbook:read".into(), "system:audit".into(), "cicd:read".into()],
            environment: vec![],
            resources: vec![],
            created_at: now,
            created_by: "system".to_string(),
        },
    );

    RbacData {
        users: HashMap::new(),
        roles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy_with_user(dir: &std::path::Path, username: &str, role: &str) -> RbacPolicy {
        let audit = Arc::new(AuditLogger::new(dir.join("audit"), 1024 * 1024, 90).unwrap());
        let policy = RbacPolicy::load(dir.join("rbac"), audit).unwrap();
        {
            let mut data = policy.data.write().unwrap();
            data.users.insert(
                username.to_string(),
                User {
                    username: username.to_string(),
                    full_name: username.to_string(),
                    email: format!("{username}@example.com"),
                    roles: vec![role.to_string()],
                    enabled: true,
                    created_at: chrono::Utc::now(),
                    last_login_at: None,
                },
            );
        }
        policy.persist().unwrap();
        policy
    }

    #[test]
    fn developer_can_execute_local_playbook() {
        let dir = tempdir().unwrap();
        let policy = policy_with_user(dir.path(), "alice", "developer");
        let decision = policy
            .check_access(&AccessRequest {
                user: "alice".into(),
                permission: "playbook:execute".into(),
                environment: "local".into(),
                resource: "s1".into(),
            })
            .unwrap();
        assert!(decision.granted);
    }

    #[test]
    fn auditor_cannot_execute_playbook() {
        let dir = tempdir().unwrap();
        let policy = policy_with_user(dir.path(), "bob", "auditor");
        let decision = policy
            .check_access(&AccessRequest {
                user: "bob".into(),
                permission: "playbook:execute".into(),
                environment: "local".into(),
                resource: "s1".into(),
            })
            .unwrap();
        assert!(!decision.granted);
    }

    #[test]
    fn operator_restricted_to_production_and_staging() {
        let dir = tempdir().unwrap();
        let policy = policy_with_user(dir.path(), "carol", "operator");
        let denied = policy
            .check_access(&AccessRequest {
                user: "carol".into(),
                permission: "playbook:execute".into(),
                environment: "virt".into(),
                resource: "dev-box".into(),
            })
            .unwrap();
        assert!(!denied.granted);

        let granted = policy
            .check_access(&AccessRequest {
                user: "carol".into(),
                permission: "playbook:execute".into(),
                environment: "virt".into(),
                resource: "production".into(),
            })
            .unwrap();
        assert!(granted.granted);
    }

    #[test]
    fn rbac_monotonicity_adding_role_never_revokes() {
        let dir = tempdir().unwrap();
        let policy = policy_with_user(dir.path(), "dave", "auditor");
        let req = AccessRequest {
            user: "dave".into(),
            permission: "system:audit".into(),
            environment: "local".into(),
            resource: "s1".into(),
        };
        let before = policy.check_access(&req).unwrap();
        assert!(before.granted);

        policy.grant_role("dave", "developer").unwrap();
        let after = policy.check_access(&req).unwrap();
        assert!(after.granted);
    }

    #[test]
    fn unknown_user_is_denied() {
        let dir = tempdir().unwrap();
        let audit = Arc::new(AuditLogger::new(dir.path().join("audit"), 1024 * 1024, 90).unwrap());
        let policy = RbacPolicy::load(dir.path().join("rbac"), audit).unwrap();
        let decision = policy
            .check_access(&AccessRequest {
                user: "ghost".into(),
                permission: "playbook:execute".into(),
                environment: "local".into(),
                resource: "s1".into(),
            })
            .unwrap();
        assert!(!decision.granted);
    }
}
