//! Environment Provisioner (C7, §3 ExecutionContext, §4.7): creates and
//! tears down the execution sandbox for a run.

pub mod container;
pub mod local;
pub mod virt;

use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The three sandbox kinds a playbook can run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum Target {
    Local,
    Container,
    Virt,
}

impl std::str::FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Target::Local),
            "container" => Ok(Target::Container),
            "virt" => Ok(Target::Virt),
            other => Err(Error::ProvisionError {
                sandbox: other.to_string(),
                message: "unknown target, expected local|container|virt".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Target::Local => "local",
            Target::Container => "container",
            Target::Virt => "virt",
        };
        write!(f, "{s}")
    }
}

/// Runtime-only execution context (§3). Created on run start, destroyed
/// on run end.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub user: String,
    /// Deployment tier (e.g. "production"/"staging"), distinct from `target`.
    pub environment: String,
    pub target: Option<Target>,
    pub runtime: Option<String>,
    pub image: Option<String>,
    pub container_name: Option<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub named_volumes: Vec<String>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_user: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    pub work_dir: PathBuf,
    pub dry_run: bool,
    pub verbose: bool,
    pub script_filter: Vec<String>,
    pub inventory: Option<String>,
}

/// Resolves the sandbox requested by `ctx.target` (or local provisioner in
/// both `None` and explicit `Local` cases).
pub async fn provision(ctx: &mut ExecutionContext, config: &Config) -> Result<()> {
    match ctx.target.unwrap_or(Target::Local) {
        Target::Local => local::provision(ctx).await,
        Target::Container => container::provision(ctx, config).await,
        Target::Virt => virt::provision(ctx).await,
    }
}

/// Tears down the sandbox created by [`provision`].
pub async fn cleanup(ctx: &ExecutionContext) -> Result<()> {
    match ctx.target.unwrap_or(Target::Local) {
        Target::Local => local::cleanup(ctx).await,
        Target::Container => container::cleanup(ctx).await,
        Target::Virt => virt::cleanup(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_round_trips_through_str() {
        assert_eq!("local".parse::<Target>().unwrap(), Target::Local);
        assert_eq!("container".parse::<Target>().unwrap(), Target::Container);
        assert_eq!("virt".parse::<Target>().unwrap(), Target::Virt);
        assert!("quantum".parse::<Target>().is_err());
    }
}
