//! ptx-ansible — Portunix Playbook Execution Engine
//!
//! Parses and runs a single `.ptxbook` file: package installs, ansible
//! playbooks, and scripts, against a local, container, or virt sandbox.

use clap::Parser;
use ptx_ansible::prelude::*;
use ptx_ansible::secrets::crypto;
use ptx_ansible::output;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Runs a Portunix playbook.
#[derive(Parser, Debug)]
#[command(name = "ptx-ansible", version, about, long_about = None)]
struct Args {
    /// Path to the `.ptxbook` file to run.
    playbook: PathBuf,

    /// Evaluate and print what would run, without executing anything.
    #[arg(long)]
    dry_run: bool,

    /// Sandbox type to run in, overriding the playbook's `environment.target`.
    #[arg(long, value_name = "local|container|virt")]
    env: Option<Target>,

    /// Named target (container name or VM name), overriding the playbook.
    #[arg(long)]
    target: Option<String>,

    /// Container image reference, overriding the playbook's `environment.image`.
    #[arg(long)]
    image: Option<String>,

    /// User identity to authorise and audit the run as.
    #[arg(long, env = "PTX_ANSIBLE_USER")]
    user: Option<String>,

    /// Path to an explicit configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match Config::load(args.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            output::error(&format!("failed to load configuration: {e}"));
            std::process::exit(e.exit_code());
        }
    };
    if let Err(e) = config.validate() {
        output::error(&format!("invalid configuration: {e}"));
        std::process::exit(e.exit_code());
    }

    let audit = match AuditLogger::new(config.audit_dir(), config.audit.max_file_size_bytes, config.audit.retention_days) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            output::error(&format!("failed to open audit log: {e}"));
            std::process::exit(e.exit_code());
        }
    };
    let rbac = match RbacPolicy::load(config.rbac_dir(), audit.clone()) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            output::error(&format!("failed to load RBAC policy: {e}"));
            std::process::exit(e.exit_code());
        }
    };

    let secrets = SecretManager::new(audit.clone());
    let key = crypto::derive_key(config.secrets.key_file.as_deref()).ok();
    match FileStore::new(config.secrets_dir(), key) {
        Ok(store) => secrets.register("file", Box::new(store)),
        Err(e) => {
            output::error(&format!("failed to open secret store: {e}"));
            std::process::exit(e.exit_code());
        }
    }
    secrets.register("env", Box::new(EnvStore::new(config.secrets.env_prefix.clone())));

    let user = args
        .user
        .or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("USERNAME").ok())
        .unwrap_or_else(|| "unknown".to_string());

    output::banner(&args.playbook.display().to_string());

    let orchestrator = Orchestrator::new(config, audit, rbac, Arc::new(secrets));
    let request = RunRequest {
        playbook_path: args.playbook,
        user,
        dry_run: args.dry_run,
        target: args.env,
        target_name: args.target,
        image: args.image,
        verbose: args.verbose > 0,
    };

    let result = orchestrator.run(request).await;
    output::summary(&result.message, result.success, &result.errors);
    std::process::exit(result.exit_code);
}

fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
