//! In-memory host
//!
//! Records every change instead of applying it. Used for `plan` dry runs
//! and as the host in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::service::ServiceSpec;
use super::{Host, HostAction, MountSpec, Platform};
use crate::error::Result;

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, (String, u32)>,
    dirs: BTreeMap<PathBuf, u32>,
    mounts: BTreeMap<PathBuf, MountSpec>,
    services: BTreeMap<String, ServiceSpec>,
    running: BTreeSet<String>,
    actions: Vec<HostAction>,
}

/// Host that keeps the machine state in memory
pub struct MemoryHost {
    platform: Platform,
    state: Mutex<MemoryState>,
}

impl MemoryHost {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Seed a file that exists before the run (not recorded as an action)
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.state
            .get_mut()
            .files
            .insert(path.into(), (content.to_string(), 0o644));
        self
    }

    /// Every change recorded so far, in order
    pub async fn actions(&self) -> Vec<HostAction> {
        self.state.lock().await.actions.clone()
    }

    /// Content and mode of a file
    pub async fn file(&self, path: impl AsRef<Path>) -> Option<(String, u32)> {
        self.state.lock().await.files.get(path.as_ref()).cloned()
    }

    /// Mode of a directory
    pub async fn dir_mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.state.lock().await.dirs.get(path.as_ref()).copied()
    }

    /// Spec of a created service
    pub async fn service(&self, name: &str) -> Option<ServiceSpec> {
        self.state.lock().await.services.get(name).cloned()
    }

    /// Whether a service is running
    pub async fn is_running(&self, name: &str) -> bool {
        self.state.lock().await.running.contains(name)
    }

    /// Number of restarts issued for a service
    pub async fn restart_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .actions
            .iter()
            .filter(|a| matches!(a, HostAction::RestartService { name: n } if n == name))
            .count()
    }
}

#[async_trait::async_trait]
impl Host for MemoryHost {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn file_exists(&self, path: &Path) -> bool {
        let state = self.state.lock().await;
        state.files.contains_key(path) || state.dirs.contains_key(path)
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.dirs.get(path) == Some(&mode) {
            return Ok(false);
        }
        state.dirs.insert(path.to_path_buf(), mode);
        state.actions.push(HostAction::CreateDir {
            path: path.to_path_buf(),
            mode,
        });
        Ok(true)
    }

    async fn write_file(&self, path: &Path, content: &str, mode: u32) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some((existing, existing_mode)) = state.files.get(path) {
            if existing == content && *existing_mode == mode {
                return Ok(false);
            }
        }
        state
            .files
            .insert(path.to_path_buf(), (content.to_string(), mode));
        state.actions.push(HostAction::WriteFile {
            path: path.to_path_buf(),
            mode,
        });
        Ok(true)
    }

    async fn mount(&self, spec: &MountSpec) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.mounts.get(&spec.mount_point) == Some(spec) {
            return Ok(false);
        }
        state.mounts.insert(spec.mount_point.clone(), spec.clone());
        state.actions.push(HostAction::Mount {
            mount_point: spec.mount_point.clone(),
        });
        Ok(true)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<bool> {
        let mut state = self.state.lock().await;
        let name = spec.service_name();
        if state.services.get(&name) == Some(spec) {
            return Ok(false);
        }
        state.services.insert(name.clone(), spec.clone());
        state.dirs.insert(spec.include_dir(), 0o755);
        state.actions.push(HostAction::CreateService {
            name,
            port: spec.port,
        });
        Ok(true)
    }

    async fn start_service(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.running.insert(name.to_string()) {
            return Ok(false);
        }
        state.actions.push(HostAction::StartService {
            name: name.to_string(),
        });
        Ok(true)
    }

    async fn restart_service(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.insert(name.to_string());
        state.actions.push(HostAction::RestartService {
            name: name.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_file_records_changes_only() {
        let host = MemoryHost::new(Platform::Ubuntu);
        let path = Path::new("/etc/example.cnf");

        assert!(host.write_file(path, "a", 0o644).await.unwrap());
        assert!(!host.write_file(path, "a", 0o644).await.unwrap());
        assert!(host.write_file(path, "b", 0o644).await.unwrap());

        assert_eq!(host.actions().await.len(), 2);
        assert_eq!(host.file(path).await, Some(("b".to_string(), 0o644)));
    }

    #[tokio::test]
    async fn test_seeded_files_exist() {
        let host = MemoryHost::new(Platform::Other).with_file("/.dockerenv", "");
        assert!(host.file_exists(Path::new("/.dockerenv")).await);
        assert!(!host.file_exists(Path::new("/.dockerinit")).await);
        assert!(host.actions().await.is_empty());
    }

    #[tokio::test]
    async fn test_restart_count() {
        let host = MemoryHost::new(Platform::Other);
        host.restart_service("apparmor").await.unwrap();
        host.restart_service("apparmor").await.unwrap();
        assert_eq!(host.restart_count("apparmor").await, 2);
        assert_eq!(host.restart_count("mysql-default").await, 0);
    }
}
