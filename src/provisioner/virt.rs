//! `virt` provider (§4.7): attaches to an already-running, SSH-reachable
//! VM. The VM lifecycle itself is an external collaborator (§1 non-goals);
//! this provider only verifies the VM is known and builds an inventory.

use super::ExecutionContext;
use crate::error::{Error, Result};
use tokio::process::Command;
use tracing::{debug, warn};

pub async fn provision(ctx: &mut ExecutionContext) -> Result<()> {
    let name = ctx
        .container_name
        .clone()
        .ok_or_else(|| Error::ProvisionError {
            sandbox: "virt".into(),
            message: "no VM name given for virt target".into(),
        })?;

    if !vm_is_known(&name).await {
        warn!(vm = %name, "VM not known to the host");
        return Err(Error::ProvisionError {
            sandbox: "virt".into(),
            message: format!("VM '{name}' is not known to the host"),
        });
    }

    ctx.ssh_host = ctx.ssh_host.clone().or_else(|| Some(name.clone()));
    ctx.ssh_port.get_or_insert(22);
    ctx.ssh_user = ctx.ssh_user.clone().or_else(|| Some("root".to_string()));
    ctx.inventory = Some(virt_inventory(ctx));
    debug!(vm = %name, "virt target provisioned");

    Ok(())
}

/// VMs are assumed persistent; cleanup never stops the VM (§4.7).
pub async fn cleanup(_ctx: &ExecutionContext) -> Result<()> {
    Ok(())
}

async fn vm_is_known(name: &str) -> bool {
    let output = Command::new("portunix").arg("vm").arg("list").output().await;
    match output {
        Ok(o) => String::from_utf8_lossy(&o.stdout).lines().any(|l| l.contains(name)),
        Err(_) => false,
    }
}

fn virt_inventory(ctx: &ExecutionContext) -> String {
    let host = ctx.ssh_host.as_deref().unwrap_or("localhost");
    let port = ctx.ssh_port.unwrap_or(22);
    let user = ctx.ssh_user.as_deref().unwrap_or("root");
    let key_line = ctx
        .ssh_key_path
        .as_ref()
        .map(|p| format!(" ansible_ssh_private_key_file={}", p.display()))
        .unwrap_or_default();
    format!(
        "[vms]\n{host} ansible_host={host} ansible_port={port} ansible_user={user}{key_line} ansible_ssh_common_args='-o StrictHostKeyChecking=no'\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virt_inventory_has_vms_group() {
        let ctx = ExecutionContext {
            ssh_host: Some("192.168.1.10".into()),
            ssh_user: Some("admin".into()),
            ssh_port: Some(2200),
            ..Default::default()
        };
        let inv = virt_inventory(&ctx);
        assert!(inv.contains("[vms]"));
        assert!(inv.contains("ansible_port=2200"));
        assert!(inv.contains("ansible_user=admin"));
    }

    #[tokio::test]
    async fn provision_without_name_fails() {
        let mut ctx = ExecutionContext::default();
        let result = provision(&mut ctx).await;
        assert!(result.is_err());
    }
}
