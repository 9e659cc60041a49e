//! Host Module
//!
//! The execution layer every convergence step goes through. Steps describe
//! what they want (a file with some content and mode, a mount, a running
//! service) and the host makes it so, reporting whether anything changed.

mod memory;
mod service;
mod system;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use memory::MemoryHost;
pub use service::{render_base_config, render_unit, ServiceSpec};
pub use system::SystemHost;

use crate::error::Result;

/// Operating system family, as far as the steps care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ubuntu,
    Debian,
    RedHat,
    Other,
}

impl Platform {
    /// Detect the platform from the contents of `/etc/os-release`
    pub fn from_os_release(content: &str) -> Self {
        let id = content
            .lines()
            .filter_map(|line| line.strip_prefix("ID="))
            .map(|v| v.trim().trim_matches('"').to_lowercase())
            .next()
            .unwrap_or_default();

        match id.as_str() {
            "ubuntu" => Platform::Ubuntu,
            "debian" => Platform::Debian,
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" => Platform::RedHat,
            _ => Platform::Other,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Ubuntu => "ubuntu",
            Platform::Debian => "debian",
            Platform::RedHat => "redhat",
            Platform::Other => "other",
        };
        f.write_str(name)
    }
}

/// A filesystem mount, mounted now and persisted in fstab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    pub mount_point: PathBuf,
    pub device: String,
    pub fstype: String,
    pub options: String,
    pub pass: u8,
}

impl MountSpec {
    /// Mount point as written in `/proc/mounts` and fstab, where
    /// whitespace and backslashes are octal escapes
    pub fn encoded_mount_point(&self) -> String {
        let mut out = String::new();
        for c in self.mount_point.display().to_string().chars() {
            match c {
                ' ' => out.push_str("\\040"),
                '\t' => out.push_str("\\011"),
                '\n' => out.push_str("\\012"),
                '\\' => out.push_str("\\134"),
                c => out.push(c),
            }
        }
        out
    }

    /// Whether a mount table (`/proc/mounts` or fstab content) lists this
    /// mount point. Comment lines are ignored.
    pub fn listed_in(&self, table: &str) -> bool {
        let mount_point = self.encoded_mount_point();
        table
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .any(|line| line.split_whitespace().nth(1) == Some(mount_point.as_str()))
    }

    /// The fstab line for this mount
    pub fn fstab_line(&self) -> String {
        format!(
            "{} {} {} {} 0 {}",
            self.device,
            self.encoded_mount_point(),
            self.fstype,
            self.options,
            self.pass
        )
    }
}

/// A change made (or that would be made) by a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HostAction {
    CreateDir { path: PathBuf, mode: u32 },
    WriteFile { path: PathBuf, mode: u32 },
    Mount { mount_point: PathBuf },
    CreateService { name: String, port: u16 },
    StartService { name: String },
    RestartService { name: String },
}

impl fmt::Display for HostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAction::CreateDir { path, mode } => {
                write!(f, "create directory {} ({:o})", path.display(), mode)
            }
            HostAction::WriteFile { path, mode } => {
                write!(f, "write file {} ({:o})", path.display(), mode)
            }
            HostAction::Mount { mount_point } => write!(f, "mount {}", mount_point.display()),
            HostAction::CreateService { name, port } => {
                write!(f, "create service {} on port {}", name, port)
            }
            HostAction::StartService { name } => write!(f, "start service {}", name),
            HostAction::RestartService { name } => write!(f, "restart service {}", name),
        }
    }
}

/// Primitives provided by the machine being converged.
///
/// Every mutating call is idempotent and returns `true` only when it
/// changed something.
#[async_trait::async_trait]
pub trait Host: Send + Sync {
    /// Platform of the machine
    fn platform(&self) -> Platform;

    /// Check whether a path exists
    async fn file_exists(&self, path: &Path) -> bool;

    /// Ensure a directory (and its parents) exists with the given mode
    async fn create_dir(&self, path: &Path, mode: u32) -> Result<bool>;

    /// Ensure a file has the given content and mode
    async fn write_file(&self, path: &Path, content: &str, mode: u32) -> Result<bool>;

    /// Ensure a filesystem is mounted and enabled at boot
    async fn mount(&self, spec: &MountSpec) -> Result<bool>;

    /// Ensure a database service exists (configuration, data directory, unit)
    async fn create_service(&self, spec: &ServiceSpec) -> Result<bool>;

    /// Ensure a service is running
    async fn start_service(&self, name: &str) -> Result<bool>;

    /// Restart a service
    async fn restart_service(&self, name: &str) -> Result<()>;
}
