//! Built-in environment facts injected into the template engine (§4.2).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Facts gathered from the host the engine is running on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facts {
    data: IndexMap<String, serde_json::Value>,
}

impl Facts {
    /// Create empty facts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Get a fact as a string.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a fact rendered as a display string, for template lookups.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.data.get(key).map(value_to_string)
    }

    /// Get all facts.
    pub fn all(&self) -> &IndexMap<String, serde_json::Value> {
        &self.data
    }

    /// Gather the built-in facts the template engine injects at construction.
    pub fn gather_local() -> Self {
        let mut facts = Self::new();

        facts.set("os", std::env::consts::OS);
        facts.set("arch", std::env::consts::ARCH);
        facts.set(
            "os_family",
            if cfg!(windows) { "windows" } else { "unix" },
        );

        if let Ok(hostname) = hostname::get() {
            facts.set("hostname", hostname.to_string_lossy().to_string());
        }

        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        facts.set("user", user);

        let home = dirs::home_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        facts.set("home", home);

        let pwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        facts.set("pwd", pwd);

        facts.set("is_container", is_container());
        facts.set("is_vm", is_vm());
        facts.set("is_wsl", is_wsl());

        facts
    }
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Detects whether the process is running inside a container.
///
/// Looks for the conventional `/.dockerenv` signature file, then falls
/// back to scanning the root cgroup for a known container runtime name.
pub fn is_container() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    if let Ok(cgroup) = std::fs::read_to_string("/proc/1/cgroup") {
        return ["docker", "containerd", "lxc"]
            .iter()
            .any(|needle| cgroup.contains(needle));
    }
    false
}

/// Detects whether the process is running inside a virtual machine, via
/// DMI product/vendor strings on linux. Best-effort; returns false when
/// the DMI tables are unreadable (e.g. non-linux, unprivileged).
pub fn is_vm() -> bool {
    let markers = ["qemu", "kvm", "virtualbox", "vmware", "xen", "hyper-v"];
    for path in ["/sys/class/dmi/id/product_name", "/sys/class/dmi/id/sys_vendor"] {
        if let Ok(value) = std::fs::read_to_string(path) {
            let lower = value.to_lowercase();
            if markers.iter().any(|m| lower.contains(m)) {
                return true;
            }
        }
    }
    false
}

/// Detects Windows Subsystem for Linux by inspecting the kernel release.
pub fn is_wsl() -> bool {
    if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
        let lower = release.to_lowercase();
        return lower.contains("microsoft") || lower.contains("wsl");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_local_sets_core_facts() {
        let facts = Facts::gather_local();
        assert!(facts.get("os").is_some());
        assert!(facts.get("arch").is_some());
        assert!(facts.get("is_container").is_some());
    }

    #[test]
    fn get_str_renders_bool_and_string() {
        let mut facts = Facts::new();
        facts.set("flag", true);
        facts.set("name", "alice");
        assert_eq!(facts.get_str("flag").as_deref(), Some("true"));
        assert_eq!(facts.get_str("name").as_deref(), Some("alice"));
    }
}
