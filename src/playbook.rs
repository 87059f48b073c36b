//! Playbook data model and parser (C1, §3, §4.1).
//!
//! A `.ptxbook` file is read once into an immutable [`Playbook`] value; no
//! mutation happens after parsing.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const API_VERSION: &str = "portunix.ai/v1";
const KIND: &str = "Playbook";

/// Root playbook entity, read from one `.ptxbook` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: Spec,

    /// Directory the source file lives in; playbook-relative paths
    /// (ansible `path`) are resolved against this. Not part of the YAML.
    #[serde(skip)]
    pub source_dir: PathBuf,
}

/// Playbook metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The body of a playbook.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Spec {
    pub variables: IndexMap<String, serde_json::Value>,
    pub environment: Option<EnvironmentSpec>,
    pub requirements: Option<Requirements>,
    pub portunix: Option<PortunixSpec>,
    pub ansible: Option<AnsibleSpec>,
    pub scripts: IndexMap<String, ScriptEntry>,
    pub rollback: Option<RollbackConfig>,
    pub secrets: IndexMap<String, serde_json::Value>,
}

/// Pins (or suggests) the execution target and sandbox parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnvironmentSpec {
    pub target: Option<String>,
    pub runtime: Option<String>,
    pub image: Option<String>,
    pub container_name: Option<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
}

/// Version requirements for external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Requirements {
    pub ansible: Option<AnsibleRequirement>,
}

/// Minimum ansible version requirement.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnsibleRequirement {
    pub min_version: Option<String>,
}

/// The packages phase section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PortunixSpec {
    pub packages: Vec<Package>,
}

/// A single package declaration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Package {
    pub name: String,
    pub variant: Option<String>,
    pub when: Option<String>,
    pub vars: IndexMap<String, serde_json::Value>,
}

/// The ansible-playbooks phase section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnsibleSpec {
    pub playbooks: Vec<AnsiblePlaybook>,
}

/// A single ansible playbook reference.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnsiblePlaybook {
    pub path: String,
    pub when: Option<String>,
    pub vars: IndexMap<String, serde_json::Value>,
}

/// A script entry: either a bare command or an extended record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptEntry {
    Bare(String),
    Extended {
        command: String,
        #[serde(default)]
        condition: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl ScriptEntry {
    /// The shell command to execute, regardless of record shape.
    pub fn command(&self) -> &str {
        match self {
            ScriptEntry::Bare(cmd) => cmd,
            ScriptEntry::Extended { command, .. } => command,
        }
    }

    /// The test-style precondition, if any.
    pub fn condition(&self) -> Option<&str> {
        match self {
            ScriptEntry::Bare(_) => None,
            ScriptEntry::Extended { condition, .. } => condition.as_deref(),
        }
    }
}

/// Rollback configuration (§3 RollbackConfig).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RollbackConfig {
    pub enabled: bool,
    pub on_failure: Vec<RollbackAction>,
    pub preserve_logs: bool,
    pub timeout: Option<u64>,
    pub retry_count: u32,
    pub variables: IndexMap<String, serde_json::Value>,
}

/// A single compensating action, declared by the playbook author.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackAction {
    Command {
        command: String,
        #[serde(default)]
        when: Option<String>,
    },
    PackageRemove {
        package: String,
        #[serde(default)]
        when: Option<String>,
    },
    FileRestore {
        path: String,
        #[serde(default)]
        when: Option<String>,
    },
}

impl RollbackAction {
    /// The `when:` predicate guarding this action, if any.
    pub fn when(&self) -> Option<&str> {
        match self {
            RollbackAction::Command { when, .. }
            | RollbackAction::PackageRemove { when, .. }
            | RollbackAction::FileRestore { when, .. } => when.as_deref(),
        }
    }
}

/// Parses a `.ptxbook` file from disk into an immutable [`Playbook`].
pub fn parse_file(path: impl AsRef<Path>) -> Result<Playbook> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if extension != "ptxbook" {
        return Err(Error::BadExtension {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| Error::SyntaxError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut playbook = parse_str(&content, path)?;
    playbook.source_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(playbook)
}

/// Parses playbook YAML text, validating it against the schema invariants
/// in §3/§4.1. `origin` is used only for error messages.
pub fn parse_str(content: &str, origin: &Path) -> Result<Playbook> {
    let playbook: Playbook = serde_yaml::from_str(content).map_err(|e| Error::SyntaxError {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })?;
    validate(&playbook, origin)?;
    Ok(playbook)
}

fn validate(playbook: &Playbook, origin: &Path) -> Result<()> {
    let schema_error = |message: String| {
        Error::SchemaError {
            path: origin.to_path_buf(),
            message,
        }
    };

    if playbook.api_version != API_VERSION {
        return Err(schema_error(format!(
            "apiVersion must be '{}', got '{}'",
            API_VERSION, playbook.api_version
        )));
    }
    if playbook.kind != KIND {
        return Err(schema_error(format!(
            "kind must be '{}', got '{}'",
            KIND, playbook.kind
        )));
    }
    if playbook.metadata.name.trim().is_empty() {
        return Err(schema_error("metadata.name is required".to_string()));
    }

    let has_packages = playbook
        .spec
        .portunix
        .as_ref()
        .map(|p| !p.packages.is_empty())
        .unwrap_or(false);
    let has_playbooks = playbook
        .spec
        .ansible
        .as_ref()
        .map(|a| !a.playbooks.is_empty())
        .unwrap_or(false);
    let has_scripts = !playbook.spec.scripts.is_empty();

    if !has_packages && !has_playbooks && !has_scripts {
        return Err(schema_error(
            "at least one of packages, playbooks or scripts is required".to_string(),
        ));
    }

    if let Some(portunix) = &playbook.spec.portunix {
        for package in &portunix.packages {
            if package.name.trim().is_empty() {
                return Err(schema_error("package name must not be empty".to_string()));
            }
        }
    }
    if let Some(ansible) = &playbook.spec.ansible {
        for playbook_ref in &ansible.playbooks {
            if playbook_ref.path.trim().is_empty() {
                return Err(schema_error(
                    "ansible playbook path must not be empty".to_string(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
apiVersion: portunix.ai/v1
kind: Playbook
metadata:
  name: s1
spec:
  portunix:
    packages:
      - name: git
      - name: go
        variant: "1.22"
"#;

    #[test]
    fn parses_valid_playbook() {
        let playbook = parse_str(VALID, Path::new("s1.ptxbook")).unwrap();
        assert_eq!(playbook.metadata.name, "s1");
        let packages = &playbook.spec.portunix.unwrap().packages;
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "git");
        assert_eq!(packages[1].variant.as_deref(), Some("1.22"));
    }

    #[test]
    fn rejects_wrong_api_version() {
        let content = VALID.replace("portunix.ai/v1", "portunix.ai/v2");
        let err = parse_str(&content, Path::new("s1.ptxbook")).unwrap_err();
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn rejects_empty_playbook() {
        let content = r#"
apiVersion: portunix.ai/v1
kind: Playbook
metadata:
  name: empty
spec: {}
"#;
        let err = parse_str(content, Path::new("empty.ptxbook")).unwrap_err();
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn rejects_missing_file() {
        let err = parse_file(Path::new("/tmp/does-not-matter.txt")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn rejects_bad_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.txt");
        std::fs::write(&path, VALID).unwrap();
        let err = parse_file(&path).unwrap_err();
        assert!(matches!(err, Error::BadExtension { .. }));
    }

    #[test]
    fn scripts_preserve_declaration_order() {
        let content = r#"
apiVersion: portunix.ai/v1
kind: Playbook
metadata:
  name: order
spec:
  scripts:
    zeta: "echo z"
    alpha: "echo a"
    build: "echo b"
"#;
        let playbook = parse_str(content, Path::new("order.ptxbook")).unwrap();
        let keys: Vec<&str> = playbook.spec.scripts.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "build"]);
    }

    #[test]
    fn extended_script_carries_condition() {
        let content = r#"
apiVersion: portunix.ai/v1
kind: Playbook
metadata:
  name: cond
spec:
  scripts:
    init:
      command: "mkdir site"
      condition: "! -d ./site"
"#;
        let playbook = parse_str(content, Path::new("cond.ptxbook")).unwrap();
        let script = &playbook.spec.scripts["init"];
        assert_eq!(script.command(), "mkdir site");
        assert_eq!(script.condition(), Some("! -d ./site"));
    }
}
