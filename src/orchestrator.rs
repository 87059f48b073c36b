//! Orchestrator (C9, §4.9): the top-level state machine binding every
//! other component together for a single playbook run.

use crate::audit::{AuditEvent, AuditLevel, AuditLogger};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::StepExecutor;
use crate::output;
use crate::playbook::{self, Playbook};
use crate::provisioner::{self, ExecutionContext, Target};
use crate::rbac::{AccessRequest, RbacPolicy};
use crate::rollback::RollbackLedger;
use crate::secrets::SecretManager;
use crate::template::TemplateEngine;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input to a single orchestrated run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub playbook_path: PathBuf,
    pub user: String,
    pub dry_run: bool,
    pub target: Option<Target>,
    pub target_name: Option<String>,
    pub image: Option<String>,
    pub verbose: bool,
}

/// Outcome returned at DONE (or an early FAIL).
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub success: bool,
    pub message: String,
    pub errors: Vec<String>,
    /// Process exit code: 0 success, 1 any failure, 2 config/parse failure.
    pub exit_code: i32,
}

/// Binds Audit (C4), RBAC (C5) and Secrets (C3) — the process-wide
/// singletons (§9) — and drives one run at a time through them.
pub struct Orchestrator {
    pub config: Config,
    pub audit: Arc<AuditLogger>,
    pub rbac: Arc<RbacPolicy>,
    pub secrets: Arc<SecretManager>,
}

impl Orchestrator {
    pub fn new(config: Config, audit: Arc<AuditLogger>, rbac: Arc<RbacPolicy>, secrets: Arc<SecretManager>) -> Self {
        Self { config, audit, rbac, secrets }
    }

    fn emit_state(&self, state: &str, user: &str) {
        debug!(state, user, "orchestrator state transition");
        output::state(state);
        let _ = self.audit.log(&AuditEvent::new(format!("orchestrator.{state}"), user));
    }

    fn fail(&self, user: &str, message: impl Into<String>, exit_code: i32) -> RunResult {
        let message = message.into();
        warn!(user, %message, "run failed");
        output::failed("run", &message);
        let _ = self.audit.log(
            &AuditEvent::new("orchestrator.done", user)
                .with_level(AuditLevel::Error)
                .failure(message.clone()),
        );
        RunResult {
            success: false,
            message: message.clone(),
            errors: vec![message],
            exit_code,
        }
    }

    /// Fails the run using `err`'s own exit-code classification (§7).
    fn fail_err(&self, user: &str, err: &Error) -> RunResult {
        self.fail(user, err.to_string(), err.exit_code())
    }

    /// Runs the START → ... → DONE state machine for `req`.
    pub async fn run(&self, req: RunRequest) -> RunResult {
        self.emit_state("start", &req.user);
        self.emit_state("init", &req.user);

        self.emit_state("parse", &req.user);
        let mut playbook = match playbook::parse_file(&req.playbook_path) {
            Ok(p) => p,
            Err(e) => return self.fail_err(&req.user, &e),
        };

        self.emit_state("authorise", &req.user);
        let environment = playbook
            .spec
            .environment
            .as_ref()
            .and_then(|e| e.target.clone())
            .unwrap_or_else(|| self.config.default_target.clone());
        let decision = match self.rbac.check_access(&AccessRequest {
            user: req.user.clone(),
            permission: "playbook:execute".to_string(),
            environment: environment.clone(),
            resource: playbook.metadata.name.clone(),
        }) {
            Ok(d) => d,
            Err(e) => return self.fail_err(&req.user, &e),
        };
        if !decision.granted {
            return self.fail(&req.user, format!("access denied: {}", decision.reason), 1);
        }

        self.emit_state("resolve", &req.user);
        if !playbook.spec.secrets.is_empty() {
            let key = crate::secrets::crypto::derive_key(self.config.secrets.key_file.as_deref()).ok();
            if let Err(e) = self
                .secrets
                .configure_from_spec(&playbook.spec.secrets, &self.config.secrets_dir(), key)
            {
                return self.fail_err(&req.user, &e);
            }
        }
        self.resolve_secrets(&mut playbook, &req.user);

        let mut ctx = self.build_context(&req, &playbook, &environment);
        let engine = TemplateEngine::new();

        self.emit_state("provision", &req.user);
        if !ctx.dry_run {
            if let Err(e) = provisioner::provision(&mut ctx, &self.config).await {
                let _ = provisioner::cleanup(&ctx).await;
                return self.fail_err(&req.user, &e);
            }
        }

        let rollback_config = playbook.spec.rollback.clone().unwrap_or_default();
        let ledger = RollbackLedger::new(rollback_config, Some(self.config.data_dir.join("rollback-logs")));
        let executor = StepExecutor {
            engine: &engine,
            ledger: &ledger,
            audit: self.audit.clone(),
            user: req.user.clone(),
            install_dir: self.config.data_dir.clone(),
        };

        self.emit_state("execute", &req.user);
        let vars = playbook.spec.variables.clone();
        let outcome = self.execute_phases(&executor, &playbook, &vars, &ctx).await;

        let mut errors = Vec::new();
        let mut exit_code = 0;
        if let Err(e) = &outcome {
            errors.push(e.to_string());
            exit_code = e.exit_code();
            if ledger.enabled() {
                self.emit_state("rollback", &req.user);
                let rollback_errors = ledger.execute_rollback(&e.to_string(), &engine).await;
                let _ = self.audit.log(&AuditEvent::new("rollback.executed", &req.user));
                errors.extend(rollback_errors);
            }
        }

        self.emit_state("cleanup", &req.user);
        if !ctx.dry_run {
            let _ = provisioner::cleanup(&ctx).await;
        }

        let success = outcome.is_ok();
        self.emit_state("done", &req.user);
        info!(playbook = %playbook.metadata.name, user = %req.user, success, "playbook run finished");
        let _ = self.audit.log(
            &AuditEvent::new("playbook.execute", &req.user)
                .with_target(&playbook.metadata.name)
                .with_environment(&environment)
                .with_detail("success", success.to_string()),
        );

        RunResult {
            success,
            message: if success {
                format!("playbook '{}' completed successfully", playbook.metadata.name)
            } else {
                format!("playbook '{}' failed", playbook.metadata.name)
            },
            errors,
            exit_code: if success { 0 } else { exit_code.max(1) },
        }
    }

    fn resolve_secrets(&self, playbook: &mut Playbook, user: &str) {
        for (_, value) in playbook.spec.variables.iter_mut() {
            if let serde_json::Value::String(s) = value {
                *s = self.secrets.resolve_all(s.as_str(), user);
            }
        }
    }

    fn build_context(&self, req: &RunRequest, playbook: &Playbook, environment: &str) -> ExecutionContext {
        let env_spec = playbook.spec.environment.clone().unwrap_or_default();
        ExecutionContext {
            user: req.user.clone(),
            environment: environment.to_string(),
            target: req.target.or_else(|| env_spec.target.as_deref().and_then(|t| t.parse().ok())),
            runtime: env_spec.runtime.clone(),
            image: req.image.clone().or(env_spec.image.clone()),
            container_name: req.target_name.clone().or(env_spec.container_name.clone()),
            ports: env_spec.ports.clone(),
            volumes: env_spec.volumes.clone(),
            named_volumes: Vec::new(),
            ssh_host: None,
            ssh_port: None,
            ssh_user: None,
            ssh_key_path: None,
            work_dir: PathBuf::new(),
            dry_run: req.dry_run,
            verbose: req.verbose,
            script_filter: Vec::new(),
            inventory: None,
        }
    }

    async fn execute_phases(
        &self,
        executor: &StepExecutor<'_>,
        playbook: &Playbook,
        vars: &IndexMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        if let Some(portunix) = &playbook.spec.portunix {
            executor.run_packages_phase(&portunix.packages, vars, ctx).await?;
        }
        if let Some(ansible) = &playbook.spec.ansible {
            executor
                .run_ansible_phase(
                    &ansible.playbooks,
                    vars,
                    ctx,
                    &playbook.source_dir,
                    playbook.spec.requirements.as_ref(),
                )
                .await?;
        }
        executor.run_scripts_phase(&playbook.spec.scripts, vars, ctx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{FileStore, SecretManager};
    use std::io::Write;
    use tempfile::tempdir;

    async fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        let config = Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        };
        let audit = Arc::new(AuditLogger::new(config.audit_dir(), 1024 * 1024, 90).unwrap());
        let rbac = Arc::new(RbacPolicy::load(config.rbac_dir(), audit.clone()).unwrap());
        let secrets = SecretManager::new(audit.clone());
        secrets.register("file", Box::new(FileStore::new(config.secrets_dir(), None).unwrap()));
        Orchestrator::new(config, audit, rbac, Arc::new(secrets))
    }

    #[tokio::test]
    async fn rbac_deny_halts_before_provisioning() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;

        let playbook_path = dir.path().join("s4.ptxbook");
        let mut file = std::fs::File::create(&playbook_path).unwrap();
        writeln!(
            file,
            "apiVersion: portunix.ai/v1\nkind: Playbook\nmetadata:\n  name: s4\nspec:\n  portunix:\n    packages:\n      - name: git\n"
        ).unwrap();

        let result = orch
            .run(RunRequest {
                playbook_path,
                user: "bob".into(),
                dry_run: true,
                ..Default::default()
            })
            .await;

        assert!(!result.success);
        assert!(result.message.contains("access denied") || !result.errors.is_empty());
    }

    #[tokio::test]
    async fn missing_playbook_file_fails_fast() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;
        let result = orch
            .run(RunRequest {
                playbook_path: dir.path().join("missing.ptxbook"),
                user: "alice".into(),
                ..Default::default()
            })
            .await;
        assert!(!result.success);
    }
}
