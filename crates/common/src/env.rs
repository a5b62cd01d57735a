//! Environment/runtime helpers
//!
//! Host probes used when registering environment facts, plus a helper to make
//! sure data directories exist before an embedded database file is opened.

use std::path::Path;

/// Ensure the parent directory of `file` exists.
pub async fn ensure_parent_dir(file: &Path) -> anyhow::Result<()> {
    if let Some(parent) = file.parent() {
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", parent.display()))?;
    }
    Ok(())
}

/// Best-effort detection of a container runtime.
pub fn is_docker() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    match std::fs::read_to_string("/proc/self/cgroup") {
        Ok(cgroup) => ["docker", "containerd", "kubepods"]
            .iter()
            .any(|marker| cgroup.contains(marker)),
        Err(_) => false,
    }
}

/// Operating system families the application is tested on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            _ => Self::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Linux => "Linux",
            Self::MacOs => "Darwin",
            Self::Windows => "Windows",
            Self::Other => std::env::consts::OS,
        }
    }
}

/// Whether the process runs with root/administrator privileges.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: getuid/geteuid have no preconditions and cannot fail.
    unsafe { libc::getuid() == 0 || libc::geteuid() == 0 }
}

#[cfg(windows)]
pub fn is_elevated() -> bool {
    std::env::var("USERNAME").map(|u| u == "Administrator").unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
pub fn is_elevated() -> bool {
    false
}
