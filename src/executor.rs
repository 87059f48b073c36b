//! Step Executor (C8, §4.8): runs the three fixed-order phases — packages,
//! ansible playbooks, scripts — inside the provisioned sandbox.

use crate::audit::{AuditEvent, AuditLogger};
use crate::error::{Error, Result};
use crate::output;
use crate::playbook::{AnsiblePlaybook, Package, Requirements, ScriptEntry};
use crate::process::{self, ExecuteOptions};
use crate::provisioner::{container, ExecutionContext, Target};
use crate::rollback::{ActionType, ExecutedAction, RollbackLedger};
use crate::template::TemplateEngine;
use indexmap::IndexMap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Merges a step's own `vars:` overlay over the playbook's global
/// variables, giving the step-local values priority (§3).
fn overlay_vars(global: &IndexMap<String, Value>, step: &IndexMap<String, Value>) -> IndexMap<String, Value> {
    let mut merged = global.clone();
    for (key, value) in step {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Canonical script ordering (§4.8); anything else runs after, in the
/// declaration order the parser preserves via `IndexMap`.
const CANONICAL_SCRIPT_ORDER: &[&str] = &[
    "internal:bin-update",
    "init",
    "create",
    "dev",
    "build",
    "test",
    "serve",
    "deploy",
];

const BIN_UPDATE_SENTINEL: &str = "builtin";

/// Runs the packages/ansible/scripts phases in order against `ctx`.
pub struct StepExecutor<'a> {
    pub engine: &'a TemplateEngine,
    pub ledger: &'a RollbackLedger,
    pub audit: Arc<AuditLogger>,
    pub user: String,
    pub install_dir: std::path::PathBuf,
}

impl<'a> StepExecutor<'a> {
    pub async fn run_packages_phase(
        &self,
        packages: &[Package],
        vars: &IndexMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        info!(count = packages.len(), "packages phase starting");
        if !packages.is_empty() {
            output::phase("packages");
        }
        for package in packages {
            let step_vars = overlay_vars(vars, &package.vars);
            if let Some(when) = &package.when {
                if !self.engine.evaluate_condition(when, &step_vars) {
                    output::skipped(&package.name);
                    continue;
                }
            }
            let name = self.engine.render(&package.name, &step_vars);
            let variant = package.variant.as_ref().map(|v| self.engine.render(v, &step_vars));

            if ctx.dry_run {
                output::skipped(&name);
                continue;
            }

            let mut command = format!("portunix install {name}");
            if let Some(variant) = &variant {
                command.push_str(&format!(" --variant {variant}"));
            }

            let result = self.run_in_target(ctx, &command, ctx.work_dir.to_str()).await;
            let success = result.as_ref().map(|r| r.success).unwrap_or(false);

            self.ledger.record(ExecutedAction::new(
                ActionType::PackageInstall,
                &name,
                &command,
                ctx.target.map(|t| t.to_string()).unwrap_or_default(),
                success,
            ));

            if !success {
                let message = result.err().map(|e| e.to_string()).unwrap_or_else(|| "non-zero exit".into());
                warn!(package = %name, "package install failed");
                output::failed(&name, &message);
                return Err(Error::StepFailed {
                    phase: "packages".into(),
                    step: name,
                    message,
                });
            }
            debug!(package = %name, "package installed");
            output::ok(&name);
        }
        Ok(())
    }

    pub async fn run_ansible_phase(
        &self,
        playbooks: &[AnsiblePlaybook],
        vars: &IndexMap<String, Value>,
        ctx: &ExecutionContext,
        source_dir: &Path,
        requirements: Option<&Requirements>,
    ) -> Result<()> {
        if playbooks.is_empty() {
            return Ok(());
        }
        info!(count = playbooks.len(), "ansible phase starting");
        output::phase("ansible");

        if !ctx.dry_run {
            let check = process::run_local("ansible --version", &ExecuteOptions::default()).await;
            let Ok(check) = check else {
                return Err(Error::MissingDependency("ansible-playbook is not callable".to_string()));
            };
            if !check.success {
                return Err(Error::MissingDependency("ansible-playbook is not callable".to_string()));
            }
            if let Some(min_version) = requirements.and_then(|r| r.ansible.as_ref()).and_then(|a| a.min_version.as_deref()) {
                let installed = parse_ansible_version(&check.stdout).ok_or_else(|| Error::MissingDependency(
                    "could not determine installed ansible version".to_string(),
                ))?;
                let required = parse_version(min_version).ok_or_else(|| Error::InvalidConfig {
                    key: "requirements.ansible.min_version".to_string(),
                    message: format!("'{min_version}' is not a valid version"),
                })?;
                if installed < required {
                    return Err(Error::MissingDependency(format!(
                        "ansible {min_version}+ required, found {}",
                        installed.iter().map(u32::to_string).collect::<Vec<_>>().join(".")
                    )));
                }
            }
        }

        for playbook in playbooks {
            let step_vars = overlay_vars(vars, &playbook.vars);
            if let Some(when) = &playbook.when {
                if !self.engine.evaluate_condition(when, &step_vars) {
                    output::skipped(&playbook.path);
                    continue;
                }
            }
            let path = source_dir.join(self.engine.render(&playbook.path, &step_vars));

            if ctx.dry_run {
                output::skipped(&path.display().to_string());
                continue;
            }

            let (inventory_arg, _tempfile) = self.materialize_inventory(ctx)?;
            let command = format!(
                "ansible-playbook {} -i {}",
                path.display(),
                inventory_arg
            );
            let result = process::run_local(&command, &ExecuteOptions::default()).await;
            let success = matches!(&result, Ok(r) if r.success);

            self.ledger.record(ExecutedAction::new(
                ActionType::AnsiblePlaybook,
                path.display().to_string(),
                &command,
                ctx.target.map(|t| t.to_string()).unwrap_or_default(),
                success,
            ));

            if !success {
                let message = result.err().map(|e| e.to_string()).unwrap_or_else(|| "non-zero exit".into());
                warn!(playbook = %path.display(), "ansible playbook failed");
                output::failed(&path.display().to_string(), &message);
                return Err(Error::StepFailed {
                    phase: "ansible".into(),
                    step: path.display().to_string(),
                    message,
                });
            }
            debug!(playbook = %path.display(), "ansible playbook completed");
            output::ok(&path.display().to_string());
        }
        Ok(())
    }

    pub async fn run_scripts_phase(
        &self,
        scripts: &IndexMap<String, ScriptEntry>,
        vars: &IndexMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        info!(count = scripts.len(), "scripts phase starting");
        if !scripts.is_empty() {
            output::phase("scripts");
        }
        for key in ordered_script_keys(scripts) {
            let script = &scripts[&key];
            let is_internal = key.starts_with("internal:");

            if !ctx.script_filter.is_empty() && !is_internal && !ctx.script_filter.contains(&key) {
                continue;
            }

            if key == "internal:bin-update" && script.command() == BIN_UPDATE_SENTINEL {
                if ctx.dry_run {
                    output::skipped(&key);
                    continue;
                }
                if ctx.target == Some(Target::Container) {
                    if let Some(image) = &ctx.image {
                        container::stage_binaries(ctx, &self.install_dir, image).await?;
                    }
                }
                continue;
            }

            if let Some(condition) = script.condition() {
                if !self.test_condition(ctx, condition).await {
                    output::skipped(&key);
                    continue;
                }
            }

            if ctx.dry_run {
                output::skipped(&key);
                continue;
            }

            let command = self.engine.render(script.command(), vars);
            let wrapped = match ctx.target {
                Some(Target::Container) => format!("cd {} && {command}", ctx.work_dir.display()),
                _ => command.clone(),
            };
            let result = self.run_in_target(ctx, &wrapped, ctx.work_dir.to_str()).await;
            let success = result.as_ref().map(|r| r.success).unwrap_or(false);

            self.ledger.record(ExecutedAction::new(
                ActionType::Script,
                &key,
                &command,
                ctx.target.map(|t| t.to_string()).unwrap_or_default(),
                success,
            ));

            if !success {
                let message = result.err().map(|e| e.to_string()).unwrap_or_else(|| "non-zero exit".into());
                warn!(script = %key, "script failed");
                output::failed(&key, &message);
                return Err(Error::StepFailed {
                    phase: "scripts".into(),
                    step: key,
                    message,
                });
            }
            debug!(script = %key, "script completed");
            output::ok(&key);
        }
        Ok(())
    }

    async fn test_condition(&self, ctx: &ExecutionContext, condition: &str) -> bool {
        let command = if cfg!(windows) {
            format!("if {condition} (exit 0) else (exit 1)")
        } else {
            format!("test {condition}")
        };
        let result = self.run_in_target(ctx, &command, ctx.work_dir.to_str()).await;
        matches!(result, Ok(r) if r.success)
    }

    async fn run_in_target(
        &self,
        ctx: &ExecutionContext,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<process::CommandResult> {
        let options = ExecuteOptions {
            cwd: cwd.map(str::to_string),
            ..Default::default()
        };
        match ctx.target {
            Some(Target::Container) => {
                let runtime = ctx.runtime.as_deref().unwrap_or("docker");
                let container_name = ctx.container_name.as_deref().ok_or_else(|| Error::ProvisionError {
                    sandbox: "container".into(),
                    message: "no container provisioned".into(),
                })?;
                process::run_in_container(runtime, container_name, command, &options).await
            }
            _ => process::run_local(command, &options).await,
        }
    }

    fn materialize_inventory(&self, ctx: &ExecutionContext) -> Result<(String, Option<tempfile::NamedTempFile>)> {
        if ctx.target == Some(Target::Local) || ctx.target.is_none() {
            return Ok(("localhost, --connection local".to_string(), None));
        }
        let inventory_text = ctx.inventory.clone().unwrap_or_default();
        let mut file = tempfile::NamedTempFile::new()?;
        use std::io::Write;
        file.write_all(inventory_text.as_bytes())?;
        let path = file.path().display().to_string();
        Ok((path, Some(file)))
    }

    /// Emits a summary audit event for one phase's outcome.
    pub fn audit_phase(&self, phase: &str, environment: &str, success: bool, error: Option<&str>) {
        let mut event = AuditEvent::new(format!("phase.{phase}"), &self.user).with_environment(environment);
        if !success {
            event = event.failure(error.unwrap_or("unknown error"));
        }
        let _ = self.audit.log(&event);
    }
}

/// Parses a dotted version string (`"2.15.2"`) into numeric components.
fn parse_version(s: &str) -> Option<Vec<u32>> {
    let parts: Vec<u32> = s.trim().split('.').map(str::parse).collect::<std::result::Result<_, _>>().ok()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// Extracts the version number from `ansible --version`'s first line, e.g.
/// `"ansible [core 2.15.2]"` or `"ansible 2.9.27"`.
fn parse_ansible_version(output: &str) -> Option<Vec<u32>> {
    let first_line = output.lines().next()?;
    let digits = first_line
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .find(|tok| tok.chars().next().is_some_and(|c| c.is_ascii_digit()))?;
    parse_version(digits)
}

fn ordered_script_keys(scripts: &IndexMap<String, ScriptEntry>) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    for canonical in CANONICAL_SCRIPT_ORDER {
        if scripts.contains_key(*canonical) {
            ordered.push(canonical.to_string());
        }
    }
    for key in scripts.keys() {
        if !ordered.contains(key) {
            ordered.push(key.clone());
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Facts;
    use crate::playbook::RollbackConfig;

    fn setup(dir: &std::path::Path) -> (TemplateEngine, RollbackLedger, Arc<AuditLogger>) {
        let engine = TemplateEngine::with_facts(Facts::new());
        let ledger = RollbackLedger::new(RollbackConfig::default(), None);
        let audit = Arc::new(AuditLogger::new(dir.join("audit"), 1024 * 1024, 90).unwrap());
        (engine, ledger, audit)
    }

    #[test]
    fn overlay_vars_prefers_step_local_value() {
        let mut global = IndexMap::new();
        global.insert("os".to_string(), Value::String("linux".into()));
        global.insert("region".to_string(), Value::String("eu".into()));
        let mut step = IndexMap::new();
        step.insert("os".to_string(), Value::String("windows".into()));

        let merged = overlay_vars(&global, &step);
        assert_eq!(merged["os"], Value::String("windows".into()));
        assert_eq!(merged["region"], Value::String("eu".into()));
    }

    #[test]
    fn parses_ansible_core_version_line() {
        assert_eq!(parse_ansible_version("ansible [core 2.15.2]\n  config file ..."), Some(vec![2, 15, 2]));
        assert_eq!(parse_ansible_version("ansible 2.9.27"), Some(vec![2, 9, 27]));
        assert_eq!(parse_ansible_version("garbage"), None);
    }

    #[test]
    fn version_comparison_respects_minimum() {
        let installed = parse_version("2.15.2").unwrap();
        assert!(installed >= parse_version("2.15").unwrap());
        assert!(installed < parse_version("2.16").unwrap());
    }

    #[test]
    fn canonical_order_precedes_remaining_scripts_in_declaration_order() {
        let mut scripts = IndexMap::new();
        scripts.insert("zeta".to_string(), ScriptEntry::Bare("echo z".into()));
        scripts.insert("test".to_string(), ScriptEntry::Bare("echo t".into()));
        scripts.insert("alpha".to_string(), ScriptEntry::Bare("echo a".into()));
        scripts.insert("build".to_string(), ScriptEntry::Bare("echo b".into()));

        let ordered = ordered_script_keys(&scripts);
        assert_eq!(ordered, vec!["build", "test", "zeta", "alpha"]);
    }

    #[tokio::test]
    async fn packages_phase_records_actions_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, ledger, audit) = setup(dir.path());
        let executor = StepExecutor {
            engine: &engine,
            ledger: &ledger,
            audit,
            user: "alice".into(),
            install_dir: dir.path().to_path_buf(),
        };
        let mut ctx = ExecutionContext::default();
        ctx.dry_run = true;
        ctx.work_dir = dir.path().to_path_buf();

        let packages = vec![
            Package { name: "git".into(), ..Default::default() },
            Package { name: "go".into(), variant: Some("1.22".into()), ..Default::default() },
        ];
        let vars = IndexMap::new();
        executor.run_packages_phase(&packages, &vars, &ctx).await.unwrap();

        assert!(ledger.actions().is_empty());
    }

    #[tokio::test]
    async fn conditional_package_is_skipped_when_false() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, ledger, audit) = setup(dir.path());
        let executor = StepExecutor {
            engine: &engine,
            ledger: &ledger,
            audit,
            user: "alice".into(),
            install_dir: dir.path().to_path_buf(),
        };
        let mut ctx = ExecutionContext::default();
        ctx.dry_run = true;
        ctx.work_dir = dir.path().to_path_buf();

        let packages = vec![Package {
            name: "powershell".into(),
            when: Some("os == 'windows'".into()),
            ..Default::default()
        }];
        let mut vars = IndexMap::new();
        vars.insert("os".to_string(), Value::String("linux".to_string()));
        executor.run_packages_phase(&packages, &vars, &ctx).await.unwrap();
        assert!(ledger.actions().is_empty());
    }
}
