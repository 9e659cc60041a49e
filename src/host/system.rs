//! System host
//!
//! Applies changes to the local machine with `tokio::fs` and the usual
//! system tools (`mount`, `systemctl`, `mysqld`).

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::service::{render_base_config, render_init_sql, render_unit, ServiceSpec};
use super::{Host, MountSpec, Platform};
use crate::error::{Error, Result};

const OS_RELEASE: &str = "/etc/os-release";
const PROC_MOUNTS: &str = "/proc/mounts";
const FSTAB: &str = "/etc/fstab";

/// Host implementation for the local machine
pub struct SystemHost {
    platform: Platform,
}

impl SystemHost {
    /// Create a host, detecting the platform from `/etc/os-release`
    pub fn detect() -> Self {
        let platform = std::fs::read_to_string(OS_RELEASE)
            .map(|content| Platform::from_os_release(&content))
            .unwrap_or(Platform::Other);
        tracing::debug!(%platform, "Detected platform");
        Self { platform }
    }

    /// Create a host for a known platform
    pub fn with_platform(platform: Platform) -> Self {
        Self { platform }
    }
}

/// Run a command, failing on a non-zero exit status
async fn run(program: &str, args: &[&str]) -> Result<std::process::Output> {
    tracing::debug!("Running: {} {}", program, args.join(" "));

    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(Error::CommandFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

async fn current_mode(path: &Path) -> Option<u32> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}

async fn dir_is_empty(path: &Path) -> Result<bool> {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

#[async_trait::async_trait]
impl Host for SystemHost {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> Result<bool> {
        let mut changed = false;

        if !self.file_exists(path).await {
            tokio::fs::create_dir_all(path).await?;
            changed = true;
        }

        if current_mode(path).await != Some(mode) {
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
            changed = true;
        }

        Ok(changed)
    }

    async fn write_file(&self, path: &Path, content: &str, mode: u32) -> Result<bool> {
        let same_content = match tokio::fs::read_to_string(path).await {
            Ok(existing) => existing == content,
            Err(_) => false,
        };

        if same_content && current_mode(path).await == Some(mode) {
            return Ok(false);
        }

        if !same_content {
            // mode only applies when the file is created
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(mode)
                .open(path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
        }

        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        tracing::debug!(path = %path.display(), mode = %format!("{:o}", mode), "Wrote file");
        Ok(true)
    }

    async fn mount(&self, spec: &MountSpec) -> Result<bool> {
        let mount_point = spec.mount_point.display().to_string();
        let mut changed = false;

        let mounts = tokio::fs::read_to_string(PROC_MOUNTS).await?;
        if !spec.listed_in(&mounts) {
            run(
                "mount",
                &["-t", &spec.fstype, "-o", &spec.options, &spec.device, &mount_point],
            )
            .await?;
            tracing::info!(mount_point = %mount_point, "Mounted {}", spec.fstype);
            changed = true;
        }

        let fstab = tokio::fs::read_to_string(FSTAB).await.unwrap_or_default();
        if !spec.listed_in(&fstab) {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(FSTAB)
                .await?;
            file.write_all(format!("{}\n", spec.fstab_line()).as_bytes())
                .await?;
            tracing::info!(mount_point = %mount_point, "Added fstab entry");
            changed = true;
        }

        Ok(changed)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<bool> {
        let mut changed = false;

        changed |= self.create_dir(&spec.include_dir(), 0o755).await?;
        changed |= self.create_dir(&spec.log_dir(), 0o750).await?;
        changed |= self.create_dir(&spec.data_dir(), 0o750).await?;
        run(
            "chown",
            &[
                "mysql:mysql",
                &spec.log_dir().display().to_string(),
                &spec.data_dir().display().to_string(),
            ],
        )
        .await?;

        changed |= self
            .write_file(&spec.config_file(), &render_base_config(spec), 0o644)
            .await?;

        if self
            .write_file(&spec.unit_path(), &render_unit(spec), 0o644)
            .await?
        {
            run("systemctl", &["daemon-reload"]).await?;
            changed = true;
        }

        if dir_is_empty(&spec.data_dir()).await? {
            tracing::info!(instance = %spec.instance, "Initializing data directory");

            let init_file = spec.config_dir().join("init.sql");
            self.write_file(&init_file, &render_init_sql(spec), 0o600)
                .await?;
            run("chown", &["mysql:mysql", &init_file.display().to_string()]).await?;

            let result = run(
                "mysqld",
                &[
                    &format!("--defaults-file={}", spec.config_file().display()),
                    "--initialize-insecure",
                    &format!("--init-file={}", init_file.display()),
                ],
            )
            .await;

            tokio::fs::remove_file(&init_file).await?;
            result?;
            changed = true;
        }

        Ok(changed)
    }

    async fn start_service(&self, name: &str) -> Result<bool> {
        let active = Command::new("systemctl")
            .args(["is-active", "--quiet", name])
            .status()
            .await?;

        if active.success() {
            return Ok(false);
        }

        run("systemctl", &["enable", "--now", name]).await?;
        tracing::info!(service = name, "Started service");
        Ok(true)
    }

    async fn restart_service(&self, name: &str) -> Result<()> {
        run("systemctl", &["restart", name]).await?;
        tracing::info!(service = name, "Restarted service");
        Ok(())
    }
}
