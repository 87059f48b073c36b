//! Audit event type (C4, §3 AuditEvent, §4.4).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARNING",
            AuditLevel::Error => "ERROR",
            AuditLevel::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// A single compliance-trail event, appended as one JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: AuditLevel,
    pub action: String,
    pub user: String,
    pub source: String,
    pub target: String,
    pub environment: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl AuditEvent {
    /// Starts a new event for `action`, defaulting to INFO/success.
    /// Invariant (v): never call `.with_detail` with a resolved secret value.
    pub fn new(action: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: generate_event_id(),
            timestamp: chrono::Utc::now(),
            level: AuditLevel::Info,
            action: action.into(),
            user: user.into(),
            source: "ptx-ansible".to_string(),
            target: String::new(),
            environment: String::new(),
            details: HashMap::new(),
            success: true,
            error: None,
            duration_ms: None,
        }
    }

    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Serializes this event as a single JSON-lines record.
    pub fn to_log_line(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

static EVENT_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn generate_event_id() -> String {
    let counter = EVENT_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let millis = chrono::Utc::now().timestamp_millis();
    format!("evt-{millis:x}-{counter:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let event = AuditEvent::new("secret.access", "alice")
            .with_level(AuditLevel::Warning)
            .with_target("db_password")
            .with_environment("local")
            .with_detail("store", "file")
            .failure("key not found");

        assert_eq!(event.action, "secret.access");
        assert_eq!(event.level, AuditLevel::Warning);
        assert!(!event.success);
        assert_eq!(event.error.as_deref(), Some("key not found"));
        assert_eq!(event.details.get("store").map(String::as_str), Some("file"));
    }

    #[test]
    fn ids_are_unique() {
        let a = AuditEvent::new("a", "u");
        let b = AuditEvent::new("a", "u");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serializes_to_single_json_line() {
        let event = AuditEvent::new("playbook.execute", "alice");
        let line = event.to_log_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"action\":\"playbook.execute\""));
    }
}
