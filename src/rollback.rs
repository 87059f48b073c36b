//! Rollback Ledger (C6, §3 ExecutedAction, §4.6): records executed
//! actions and drives compensating actions in reverse on failure.

use crate::error::Result;
use crate::playbook::RollbackConfig;
use crate::process::{self, ExecuteOptions};
use crate::template::TemplateEngine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// The kind of side-effect an [`ExecutedAction`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    PackageInstall,
    AnsiblePlaybook,
    Script,
}

/// One recorded side-effect, created immediately after the Step Executor
/// attempts it. Never mutated once pushed (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target: String,
    pub details: String,
    pub environment: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub success: bool,
}

impl ExecutedAction {
    pub fn new(
        action_type: ActionType,
        target: impl Into<String>,
        details: impl Into<String>,
        environment: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            action_type,
            target: target.into(),
            details: details.into(),
            environment: environment.into(),
            timestamp: chrono::Utc::now(),
            success,
        }
    }
}

/// A single log line emitted during rollback (user-facing + audit trail
/// input; not the compliance AuditEvent itself).
#[derive(Debug, Clone)]
pub struct RollbackLogLine(pub String);

/// Records executed actions for one playbook run and drives compensating
/// actions in reverse (LIFO) on failure.
pub struct RollbackLedger {
    config: RollbackConfig,
    actions: Mutex<Vec<ExecutedAction>>,
    log_lines: Mutex<Vec<String>>,
    log_dir: Option<PathBuf>,
}

impl RollbackLedger {
    pub fn new(config: RollbackConfig, log_dir: Option<PathBuf>) -> Self {
        Self {
            config,
            actions: Mutex::new(Vec::new()),
            log_lines: Mutex::new(Vec::new()),
            log_dir,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Appends an action to the ledger. Called regardless of the action's
    /// own success/failure — the ledger tracks attempts, not outcomes.
    pub fn record(&self, action: ExecutedAction) {
        self.actions.lock().unwrap().push(action);
    }

    fn log(&self, line: impl Into<String>) {
        self.log_lines.lock().unwrap().push(line.into());
    }

    /// Executes declared `on_failure` actions, then walks recorded actions
    /// in LIFO order applying type-specific compensation. Aggregates (does
    /// not throw) its own errors; never masks the original failure.
    pub async fn execute_rollback(&self, reason: &str, engine: &TemplateEngine) -> Vec<String> {
        let mut errors = Vec::new();
        self.log(format!("rollback started: {reason}"));

        let empty_vars: IndexMap<String, Value> = IndexMap::new();
        for action in &self.config.on_failure {
            if let Some(when) = action.when() {
                if !engine.evaluate_condition(when, &empty_vars) {
                    continue;
                }
            }
            if let Err(e) = self.apply_declared_action(action, engine).await {
                errors.push(e);
            }
        }

        let recorded: Vec<ExecutedAction> = self.actions.lock().unwrap().clone();
        for action in recorded.iter().rev() {
            if !action.success {
                continue;
            }
            match action.action_type {
                ActionType::PackageInstall => {
                    self.log(format!(
                        "package_remove for '{}': manual cleanup may be needed",
                        action.target
                    ));
                }
                ActionType::AnsiblePlaybook => {
                    self.log(format!(
                        "no automatic undo for ansible playbook '{}'",
                        action.target
                    ));
                }
                ActionType::Script => {
                    self.log(format!("no automatic undo for script '{}'", action.target));
                }
            }
        }

        if self.config.preserve_logs {
            if let Err(e) = self.flush_log() {
                errors.push(format!("failed to write rollback log: {e}"));
            }
        }

        errors
    }

    async fn apply_declared_action(
        &self,
        action: &crate::playbook::RollbackAction,
        engine: &TemplateEngine,
    ) -> std::result::Result<(), String> {
        let empty_vars: IndexMap<String, Value> = IndexMap::new();
        match action {
            crate::playbook::RollbackAction::Command { command, .. } => {
                let rendered = engine.render(command, &empty_vars);
                let result = process::run_local(&rendered, &ExecuteOptions::default())
                    .await
                    .map_err(|e| e.to_string())?;
                self.log(format!("ran rollback command '{rendered}' (exit={})", result.exit_code));
                if !result.success {
                    return Err(format!("rollback command '{rendered}' exited non-zero"));
                }
                Ok(())
            }
            crate::playbook::RollbackAction::PackageRemove { package, .. } => {
                self.log(format!(
                    "package_remove for '{package}': manual cleanup may be needed"
                ));
                Ok(())
            }
            crate::playbook::RollbackAction::FileRestore { path, .. } => {
                let backup = format!("{path}.backup");
                if !PathBuf::from(&backup).exists() {
                    return Err(format!("backup file '{backup}' does not exist"));
                }
                fs::copy(&backup, path).map_err(|e| e.to_string())?;
                self.log(format!("restored '{path}' from '{backup}'"));
                Ok(())
            }
        }
    }

    fn flush_log(&self) -> Result<()> {
        let Some(dir) = &self.log_dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;
        let filename = format!("rollback-{}.log", chrono::Utc::now().format("%Y%m%d-%H%M%S"));
        let lines = self.log_lines.lock().unwrap().join("\n");
        fs::write(dir.join(filename), lines)?;
        Ok(())
    }

    /// Returns the recorded actions, oldest first (for tests/inspection).
    pub fn actions(&self) -> Vec<ExecutedAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Facts;
    use crate::playbook::RollbackAction;

    fn engine() -> TemplateEngine {
        TemplateEngine::with_facts(Facts::new())
    }

    #[tokio::test]
    async fn rollback_visits_recorded_actions_in_lifo_order() {
        let config = RollbackConfig {
            enabled: true,
            ..Default::default()
        };
        let ledger = RollbackLedger::new(config, None);
        ledger.record(ExecutedAction::new(ActionType::PackageInstall, "git", "", "local", true));
        ledger.record(ExecutedAction::new(ActionType::PackageInstall, "go", "", "local", true));
        ledger.record(ExecutedAction::new(ActionType::Script, "build", "", "local", true));

        ledger.execute_rollback("script failed", &engine()).await;

        let log = ledger.log_lines.lock().unwrap().clone();
        let build_idx = log.iter().position(|l| l.contains("'build'")).unwrap();
        let go_idx = log.iter().position(|l| l.contains("'go'")).unwrap();
        let git_idx = log.iter().position(|l| l.contains("'git'")).unwrap();
        assert!(build_idx < go_idx);
        assert!(go_idx < git_idx);
    }

    #[tokio::test]
    async fn declared_command_actions_run_in_declaration_order() {
        let config = RollbackConfig {
            enabled: true,
            on_failure: vec![
                RollbackAction::Command { command: "true".into(), when: None },
                RollbackAction::Command { command: "true".into(), when: None },
            ],
            ..Default::default()
        };
        let ledger = RollbackLedger::new(config, None);
        let errors = ledger.execute_rollback("failed", &engine()).await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn file_restore_without_backup_is_an_error() {
        let config = RollbackConfig {
            enabled: true,
            on_failure: vec![RollbackAction::FileRestore {
                path: "/tmp/ptx-ansible-rollback-test-missing".into(),
                when: None,
            }],
            ..Default::default()
        };
        let ledger = RollbackLedger::new(config, None);
        let errors = ledger.execute_rollback("failed", &engine()).await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn package_remove_is_logged_not_executed() {
        let config = RollbackConfig {
            enabled: true,
            on_failure: vec![RollbackAction::PackageRemove { package: "git".into(), when: None }],
            ..Default::default()
        };
        let ledger = RollbackLedger::new(config, None);
        let errors = ledger.execute_rollback("failed", &engine()).await;
        assert!(errors.is_empty());
        let log = ledger.log_lines.lock().unwrap().clone();
        assert!(log.iter().any(|l| l.contains("manual cleanup")));
    }
}
