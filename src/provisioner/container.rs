//! `container` provider (§4.7): ephemeral Docker/Podman sandbox, including
//! cross-platform binary staging (§4.7.1).

use super::ExecutionContext;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DAEMON_WAIT_BUDGET: Duration = Duration::from_secs(5 * 60);
const DAEMON_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Binaries staged into `/usr/local/bin` inside the sandbox (§4.7.1).
const STAGED_BINARIES: &[&str] = &["portunix", "ansible-playbook"];

pub async fn provision(ctx: &mut ExecutionContext, config: &Config) -> Result<()> {
    let runtime = match &ctx.runtime {
        Some(r) => r.clone(),
        None => resolve_runtime(&config.runtime_preference).await?,
    };

    if runtime == "docker" {
        wait_for_docker_ready().await?;
    }

    let (binds, named_volumes) = parse_volumes(&ctx.volumes);
    for volume in &named_volumes {
        ensure_named_volume(&runtime, volume).await?;
    }

    let name = ctx
        .container_name
        .clone()
        .unwrap_or_else(|| format!("ptx-ansible-{}", random_suffix(8)));

    let image = ctx
        .image
        .clone()
        .ok_or_else(|| Error::ProvisionError {
            sandbox: "container".into(),
            message: "no image specified".into(),
        })?;

    create_container(&runtime, &name, &image, &ctx.ports, &binds, &named_volumes).await?;
    ensure_workspace_dir(&runtime, &name).await?;
    info!(container = %name, %image, %runtime, "container provisioned");

    ctx.runtime = Some(runtime);
    ctx.container_name = Some(name.clone());
    ctx.named_volumes = named_volumes;
    ctx.work_dir = PathBuf::from("/workspace");
    ctx.inventory = Some(container_inventory(&name, ctx.ssh_key_path.as_deref()));

    Ok(())
}

/// Auto-detects a container runtime on PATH (§4.7); if none is found,
/// invokes the external installer for the first preferred runtime and
/// re-detects once before giving up.
async fn resolve_runtime(preference: &[String]) -> Result<String> {
    if let Ok(runtime) = process::detect_runtime(preference).await {
        return Ok(runtime);
    }
    let Some(first_choice) = preference.first() else {
        return Err(Error::RuntimeNotAvailable("no runtime preference configured".to_string()));
    };
    warn!(runtime = %first_choice, "no container runtime on PATH, invoking installer");
    let command = format!("portunix install {first_choice}");
    process::run_local(&command, &process::ExecuteOptions::default()).await?;
    process::detect_runtime(preference).await
}

pub async fn cleanup(ctx: &ExecutionContext) -> Result<()> {
    let Some(name) = &ctx.container_name else {
        return Ok(());
    };
    let runtime = ctx.runtime.as_deref().unwrap_or("docker");
    debug!(container = %name, "removing container");
    let _ = Command::new(runtime).arg("rm").arg("-f").arg(name).output().await;
    Ok(())
}

fn random_suffix(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Splits `ctx.volumes` into bind mounts and `:named` volume references.
fn parse_volumes(volumes: &[String]) -> (Vec<String>, Vec<String>) {
    let mut binds = Vec::new();
    let mut named = Vec::new();
    for spec in volumes {
        if let Some(name) = spec.strip_suffix(":named") {
            named.push(name.to_string());
        } else {
            binds.push(spec.clone());
        }
    }
    (binds, named)
}

async fn ensure_named_volume(runtime: &str, name: &str) -> Result<()> {
    let inspect = Command::new(runtime).arg("volume").arg("inspect").arg(name).output().await;
    if matches!(inspect, Ok(o) if o.status.success()) {
        return Ok(());
    }
    let status = Command::new(runtime)
        .arg("volume")
        .arg("create")
        .arg(name)
        .status()
        .await
        .map_err(Error::Io)?;
    if !status.success() {
        return Err(Error::ProvisionError {
            sandbox: "container".into(),
            message: format!("failed to create named volume '{name}'"),
        });
    }
    Ok(())
}

async fn create_container(
    runtime: &str,
    name: &str,
    image: &str,
    ports: &[String],
    binds: &[String],
    named_volumes: &[String],
) -> Result<()> {
    let mut cmd = Command::new(runtime);
    cmd.arg("run").arg("-d").arg("--name").arg(name);
    for port in ports {
        cmd.arg("-p").arg(port);
    }
    for bind in binds {
        cmd.arg("-v").arg(bind);
    }
    for volume in named_volumes {
        cmd.arg("-v").arg(format!("{volume}:/mnt/{volume}"));
    }
    cmd.arg(image).arg("sleep").arg("infinity");

    let output = cmd.output().await.map_err(Error::Io)?;
    if !output.status.success() {
        return Err(Error::ProvisionError {
            sandbox: "container".into(),
            message: format!(
                "docker run failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }
    Ok(())
}

async fn ensure_workspace_dir(runtime: &str, container: &str) -> Result<()> {
    let status = Command::new(runtime)
        .arg("exec")
        .arg(container)
        .arg("mkdir")
        .arg("-p")
        .arg("/workspace")
        .status()
        .await
        .map_err(Error::Io)?;
    if !status.success() {
        return Err(Error::ProvisionError {
            sandbox: "container".into(),
            message: "failed to create /workspace".into(),
        });
    }
    Ok(())
}

async fn wait_for_docker_ready() -> Result<()> {
    let deadline = tokio::time::Instant::now() + DAEMON_WAIT_BUDGET;
    loop {
        if let Ok(output) = Command::new("docker").arg("info").output().await {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("Server:") && !stdout.contains("failed to connect") {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("docker daemon did not become ready within the wait budget");
            return Err(Error::DaemonNotReady(
                "docker daemon did not become ready within 5 minutes".to_string(),
            ));
        }
        tokio::time::sleep(DAEMON_POLL_INTERVAL).await;
    }
}

fn container_inventory(name: &str, key_path: Option<&Path>) -> String {
    let key_line = key_path
        .map(|p| format!(" ansible_ssh_private_key_file={}", p.display()))
        .unwrap_or_default();
    format!(
        "[containers]\n{name} ansible_host=localhost ansible_port=2222 ansible_user=root{key_line} ansible_ssh_common_args='-o StrictHostKeyChecking=no'\n"
    )
}

/// Derives the staging platform from an image reference (§4.7.1).
pub fn target_platform(image: &str) -> &'static str {
    let lower = image.to_lowercase();
    if lower.contains("arm64") || lower.contains("aarch64") {
        "linux-arm64"
    } else if lower.contains("windows") || lower.contains("nanoserver") || lower.contains("servercore") {
        "windows-amd64"
    } else {
        "linux-amd64"
    }
}

/// Stages the per-platform helper binaries into a running container,
/// extracting the platform archive into the cache directory if needed.
pub async fn stage_binaries(ctx: &ExecutionContext, install_dir: &Path, image: &str) -> Result<()> {
    let runtime = ctx.runtime.as_deref().unwrap_or("docker");
    let container = ctx
        .container_name
        .as_deref()
        .ok_or_else(|| Error::ProvisionError {
            sandbox: "container".into(),
            message: "no container to stage binaries into".into(),
        })?;

    let platform = target_platform(image);
    let cache_dir = install_dir.join("cache").join(platform);
    debug!(%platform, container = %container, "staging binaries");

    if !cache_dir.exists() {
        extract_platform_archive(install_dir, platform, &cache_dir)?;
    }

    for binary in STAGED_BINARIES {
        let local_path = cache_dir.join(binary);
        if !local_path.exists() {
            continue;
        }
        let dest = format!("/usr/local/bin/{binary}");
        process::copy_into_container(runtime, &local_path, container, &dest).await?;
        let _ = Command::new(runtime)
            .arg("exec")
            .arg(container)
            .arg("chmod")
            .arg("+x")
            .arg(&dest)
            .status()
            .await;
    }

    let _ = Command::new(runtime)
        .arg("exec")
        .arg(container)
        .arg("sh")
        .arg("-c")
        .arg("apt-get install -y ca-certificates 2>/dev/null || apk add --no-cache ca-certificates 2>/dev/null || true")
        .status()
        .await;

    Ok(())
}

fn extract_platform_archive(install_dir: &Path, platform: &str, cache_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(cache_dir)?;
    let tar_gz = install_dir.join("platforms").join(format!("{platform}.tar.gz"));
    let zip = install_dir.join("platforms").join(format!("{platform}.zip"));

    if tar_gz.exists() {
        let file = std::fs::File::open(&tar_gz)?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        archive
            .unpack(cache_dir)
            .map_err(|e| Error::ProvisionError {
                sandbox: "container".into(),
                message: format!("failed to extract {}: {e}", tar_gz.display()),
            })?;
        Ok(())
    } else if zip.exists() {
        let file = std::fs::File::open(&zip)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| Error::ProvisionError {
            sandbox: "container".into(),
            message: format!("failed to open {}: {e}", zip.display()),
        })?;
        archive.extract(cache_dir).map_err(|e| Error::ProvisionError {
            sandbox: "container".into(),
            message: format!("failed to extract {}: {e}", zip.display()),
        })?;
        Ok(())
    } else {
        Err(Error::MissingDependency(format!(
            "no platform archive found for '{platform}' under {}",
            install_dir.join("platforms").display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_platform_detects_arm64() {
        assert_eq!(target_platform("myrepo/foo:arm64-latest"), "linux-arm64");
        assert_eq!(target_platform("myrepo/foo:aarch64"), "linux-arm64");
    }

    #[test]
    fn target_platform_detects_windows() {
        assert_eq!(target_platform("mcr.microsoft.com/windows/nanoserver"), "windows-amd64");
    }

    #[test]
    fn target_platform_defaults_to_linux_amd64() {
        assert_eq!(target_platform("ubuntu:22.04"), "linux-amd64");
    }

    #[test]
    fn parse_volumes_splits_named_and_bind() {
        let (binds, named) = parse_volumes(&["./data:/data".to_string(), "cache:named".to_string()]);
        assert_eq!(binds, vec!["./data:/data".to_string()]);
        assert_eq!(named, vec!["cache".to_string()]);
    }

    #[test]
    fn container_name_matches_expected_pattern() {
        let name = format!("ptx-ansible-{}", random_suffix(8));
        let re = regex::Regex::new(r"^ptx-ansible-[a-z0-9]{8}$").unwrap();
        assert!(re.is_match(&name));
    }

    #[test]
    fn inventory_points_at_localhost_2222() {
        let inv = container_inventory("ptx-ansible-abc12345", None);
        assert!(inv.contains("ansible_host=localhost ansible_port=2222"));
        assert!(inv.contains("[containers]"));
    }

    #[tokio::test]
    async fn resolve_runtime_fails_fast_with_no_preference() {
        let err = resolve_runtime(&[]).await.unwrap_err();
        assert!(matches!(err, Error::RuntimeNotAvailable(_)));
    }

    #[tokio::test]
    async fn resolve_runtime_finds_a_runtime_already_on_path() {
        let bogus = "ptx-ansible-definitely-not-a-real-runtime".to_string();
        let preference = vec![bogus, "sh".to_string()];
        let runtime = resolve_runtime(&preference).await;
        assert_eq!(runtime.unwrap(), "sh");
    }
}
