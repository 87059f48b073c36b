//! Error types for the playbook execution engine.
//!
//! This module defines the closed set of error kinds the engine can
//! surface, each mapped to a stable CLI exit code so callers (and audit
//! consumers) can distinguish failure classes without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the playbook execution engine.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Parser errors (C1)
    // ========================================================================
    /// Playbook file does not exist.
    #[error("playbook file not found: {0}")]
    FileNotFound(PathBuf),

    /// Playbook file does not carry a recognised extension.
    #[error("playbook '{path}' has unsupported extension, expected .ptxbook")]
    BadExtension {
        /// Path to the offending file
        path: PathBuf,
    },

    /// The YAML in a playbook file could not be parsed.
    #[error("syntax error in '{path}': {message}")]
    SyntaxError {
        /// Path to the playbook file
        path: PathBuf,
        /// Underlying message
        message: String,
    },

    /// The YAML parsed but does not satisfy the playbook schema.
    #[error("schema error in '{path}': {message}")]
    SchemaError {
        /// Path to the playbook file
        path: PathBuf,
        /// Underlying message
        message: String,
    },

    // ========================================================================
    // Provisioner errors (C7)
    // ========================================================================
    /// A dependency required to run a step is missing (binary, image, etc).
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Provisioning a sandbox failed (container create, VM lookup, ...).
    #[error("failed to provision {sandbox} sandbox: {message}")]
    ProvisionError {
        /// Sandbox type name
        sandbox: String,
        /// Underlying message
        message: String,
    },

    /// The runtime needed by a sandbox type is not available on this host.
    #[error("runtime not available: {0}")]
    RuntimeNotAvailable(String),

    /// The sandbox did not reach a ready state within the allotted time.
    #[error("daemon not ready: {0}")]
    DaemonNotReady(String),

    // ========================================================================
    // RBAC / secret errors (C3, C5)
    // ========================================================================
    /// RBAC denied the requested action.
    #[error("access denied: user '{user}' lacks '{permission}' on '{resource}'")]
    AccessDenied {
        /// Requesting user
        user: String,
        /// Permission string (e.g. `playbook:execute`)
        permission: String,
        /// Resource identifier
        resource: String,
    },

    /// Secret resolution failed (missing key, decrypt failure, backend error).
    #[error("secret error: {0}")]
    SecretError(String),

    // ========================================================================
    // Executor / rollback errors (C8, C9)
    // ========================================================================
    /// A step in a phase failed.
    #[error("step '{step}' failed in phase '{phase}': {message}")]
    StepFailed {
        /// Phase name (packages/ansible/scripts)
        phase: String,
        /// Step identifier
        step: String,
        /// Underlying message
        message: String,
    },

    /// Rollback of a previously executed action failed.
    #[error("rollback failed for action '{action}': {message}")]
    RollbackFailed {
        /// Action identifier
        action: String,
        /// Underlying message
        message: String,
    },

    /// A step exceeded its allotted timeout.
    #[error("'{0}' timed out")]
    Timeout(String),

    /// Execution was cancelled before completion.
    #[error("execution cancelled: {0}")]
    Cancelled(String),

    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO / serialization errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // ========================================================================
    // Other
    // ========================================================================
    /// Internal error that should not normally surface to users.
    #[error("internal error: {0}")]
    Internal(String),

    /// Generic error with an attached source, used by [`ErrorContext`].
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Returns true if this error represents a condition the orchestrator
    /// may reasonably continue past (e.g. a `when:` skip, not a real one).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns the CLI exit code for this error, per the engine's 0/1/2
    /// contract: 2 is reserved for configuration/parse failures (nothing
    /// ran yet), 1 covers every other failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::FileNotFound(_)
            | Error::BadExtension { .. }
            | Error::SyntaxError { .. }
            | Error::SchemaError { .. }
            | Error::Config(_)
            | Error::InvalidConfig { .. } => 2,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(Error::FileNotFound(PathBuf::from("x")).exit_code(), 2);
        assert_eq!(
            Error::SchemaError {
                path: PathBuf::from("x"),
                message: "bad".into(),
            }
            .exit_code(),
            2
        );
        assert_eq!(
            Error::AccessDenied {
                user: "bob".into(),
                permission: "playbook:execute".into(),
                resource: "prod".into(),
            }
            .exit_code(),
            1
        );
        assert_eq!(Error::Internal("oops".into()).exit_code(), 1);
    }

    #[test]
    fn timeout_is_recoverable() {
        assert!(Error::Timeout("step".into()).is_recoverable());
        assert!(!Error::Cancelled("user".into()).is_recoverable());
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let wrapped = res.context("loading config");
        assert!(wrapped.is_err());
        assert_eq!(wrapped.unwrap_err().to_string(), "loading config");
    }
}
