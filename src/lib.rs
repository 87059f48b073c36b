//! # ptx-ansible — Portunix Playbook Execution Engine
//!
//! Parses `.ptxbook` files, resolves templates and secrets, authorises the
//! requesting user, provisions a sandbox, and runs a playbook's three
//! phases — packages, ansible playbooks, scripts — recording rollback
//! actions and a compliance audit trail along the way.
//!
//! ## Core Concepts
//!
//! - **Playbook**: a `.ptxbook` YAML file describing packages, ansible
//!   playbooks, and scripts to run (C1, [`playbook`])
//! - **Template Engine**: resolves `{{ name }}` placeholders and `when:`
//!   predicates against variables and host facts (C2, [`template`])
//! - **Secret Manager**: resolves `{{ secret:store:key }}` references
//!   against pluggable, encrypted-at-rest stores (C3, [`secrets`])
//! - **Audit Logger**: an append-only, JSON-lines compliance trail,
//!   deliberately separate from operational `tracing` output (C4, [`audit`])
//! - **RBAC Policy**: evaluates `(user, permission, environment, resource)`
//!   access decisions (C5, [`rbac`])
//! - **Rollback Ledger**: records executed actions and drives compensating
//!   actions in reverse on failure (C6, [`rollback`])
//! - **Environment Provisioner**: creates and tears down the local,
//!   container, or virt sandbox a playbook runs in (C7, [`provisioner`])
//! - **Step Executor**: runs the three fixed-order phases inside the
//!   provisioned sandbox (C8, [`executor`])
//! - **Orchestrator**: the top-level state machine binding every other
//!   component for one playbook run (C9, [`orchestrator`])
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Orchestrator                               │
//! │   START → PARSE → AUTHORISE → RESOLVE → PROVISION → EXECUTE →        │
//! │              (ROLLBACK) → CLEANUP → DONE                             │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌────────────┬────────────┼────────────┬────────────┐
//!          ▼            ▼            ▼            ▼            ▼
//! ┌──────────────┐┌───────────┐┌───────────┐┌───────────┐┌──────────────┐
//! │   Playbook   ││ Template  ││  Secret   ││   RBAC    ││ Provisioner  │
//! │   (parser)   ││  Engine   ││  Manager  ││  Policy   ││ local/docker │
//! └──────────────┘└───────────┘└───────────┘└───────────┘└──────────────┘
//!          │                                                     │
//!          └─────────────────────────┬───────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  Step Executor  +  Rollback Ledger                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Audit Logger                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use ptx_ansible::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load(None)?;
//!     let audit = Arc::new(AuditLogger::new(config.audit_dir(), 10 * 1024 * 1024, 90)?);
//!     let rbac = Arc::new(RbacPolicy::load(config.rbac_dir(), audit.clone())?);
//!     let mut secrets = SecretManager::new(audit.clone());
//!     secrets.register("file", Box::new(FileStore::new(config.secrets_dir(), None)?));
//!
//!     let orchestrator = Orchestrator::new(config, audit, rbac, Arc::new(secrets));
//!     let result = orchestrator
//!         .run(RunRequest {
//!             playbook_path: "site.ptxbook".into(),
//!             user: "alice".into(),
//!             ..Default::default()
//!         })
//!         .await;
//!     std::process::exit(if result.success { 0 } else { 1 });
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod executor;
pub mod facts;
pub mod orchestrator;
pub mod output;
pub mod playbook;
pub mod process;
pub mod provisioner;
pub mod rbac;
pub mod rollback;
pub mod secrets;
pub mod template;

/// Convenience re-exports of the engine's main entry points.
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditLevel, AuditLogger, AuditQuery, AuditStats};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorContext, Result};
    pub use crate::executor::StepExecutor;
    pub use crate::facts::Facts;
    pub use crate::orchestrator::{Orchestrator, RunRequest, RunResult};
    pub use crate::playbook::{self, Playbook};
    pub use crate::provisioner::{ExecutionContext, Target};
    pub use crate::rbac::{AccessRequest, Decision, RbacPolicy, Role, User};
    pub use crate::rollback::{ActionType, ExecutedAction, RollbackLedger};
    pub use crate::secrets::{EnvStore, FileStore, SecretManager, SecretStore};
    pub use crate::template::TemplateEngine;
    pub use std::sync::Arc;
}
