//! myconverge Configuration
//!
//! This module provides the configuration structures for one convergence
//! pass. The configuration is loaded once, resolved against defaults and
//! then passed by reference to every step; nothing mutates it afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::replication::{MasterEndpoint, ReplicationRole};

/// Main myconverge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergeConfig {
    /// Database instance configuration
    pub instance: InstanceConfig,

    /// Temporary directory (tmpfs) configuration
    #[serde(default)]
    pub tmpdir: TmpDirConfig,

    /// Character set configuration
    #[serde(default)]
    pub charset: CharsetConfig,

    /// Server tuning configuration
    #[serde(default)]
    pub tuning: TuningConfig,

    /// Replication configuration (absent for a standalone server)
    #[serde(default)]
    pub replication: Option<ReplicationConfig>,

    /// How SQL reaches the instance
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Instance configuration. Every field is optional so that a partial
/// configuration can be overlaid on top of another with [`InstanceConfig::merge`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance name (ignored when replication is configured; the name is
    /// then derived from the role)
    #[serde(default)]
    pub name: Option<String>,

    /// MySQL port
    #[serde(default)]
    pub port: Option<u16>,

    /// Initial root password
    #[serde(default)]
    pub root_password: Option<String>,

    /// Path of the generated root credential file
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
}

/// Fully resolved instance options
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceOptions {
    pub name: String,
    pub port: u16,
    pub root_password: String,
    pub credential_file: PathBuf,
}

/// tmpfs mount used as the server's temporary directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmpDirConfig {
    /// Mount a tmpfs and point the server at it
    #[serde(default)]
    pub enabled: bool,

    /// Mount point
    #[serde(default = "default_tmpdir_path")]
    pub path: PathBuf,

    /// tmpfs size (mount `size=` option)
    #[serde(default = "default_tmpdir_size")]
    pub size: String,
}

/// Server character set and collation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharsetConfig {
    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_collation")]
    pub collation: String,
}

/// Server tuning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Derive unset values from the detected hardware
    #[serde(default = "default_true")]
    pub auto: bool,

    /// Maximum client connections
    #[serde(default)]
    pub max_connections: Option<u32>,

    /// Binary log retention in days
    #[serde(default)]
    pub expire_logs_days: Option<u32>,

    /// Extra `[mysqld]` settings written to tuning.cnf
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

/// Replication role kind as written in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Master,
    Slave,
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Role of this server
    pub role: RoleKind,

    /// Server id (defaults to 1 for a master, 2 for a slave)
    #[serde(default)]
    pub server_id: Option<u32>,

    /// Password of the replication user (defaults to "repl")
    #[serde(default)]
    pub password: Option<String>,

    /// Master host (required for a slave)
    #[serde(default)]
    pub master_host: Option<String>,

    /// Master port (omitted from CHANGE MASTER TO when unset)
    #[serde(default)]
    pub master_port: Option<u16>,
}

/// Backend used to send SQL to the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Run the `mysql` client binary with the credential file
    #[default]
    Client,
    /// Connect over the MySQL protocol with sqlx
    Native,
}

/// SQL session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: SessionBackend,

    /// Path of the `mysql` client binary
    #[serde(default = "default_client_binary")]
    pub client_binary: PathBuf,

    /// Host used by the native backend
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Connection pool size for the native backend
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_db_port() -> u16 {
    3306
}

fn default_instance_name() -> String {
    "default".to_string()
}

fn default_credential_file() -> PathBuf {
    PathBuf::from("/root/.my.cnf")
}

fn default_tmpdir_path() -> PathBuf {
    PathBuf::from("/var/mysqltmp")
}

fn default_tmpdir_size() -> String {
    "2G".to_string()
}

fn default_charset() -> String {
    "utf8".to_string()
}

fn default_collation() -> String {
    "utf8_general_ci".to_string()
}

fn default_replication_password() -> String {
    "repl".to_string()
}

fn default_client_binary() -> PathBuf {
    PathBuf::from("/usr/bin/mysql")
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_pool_size() -> u32 {
    2
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TmpDirConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_tmpdir_path(),
            size: default_tmpdir_size(),
        }
    }
}

impl Default for CharsetConfig {
    fn default() -> Self {
        Self {
            charset: default_charset(),
            collation: default_collation(),
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            auto: true,
            max_connections: None,
            expire_logs_days: None,
            overrides: BTreeMap::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            client_binary: default_client_binary(),
            host: default_db_host(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl InstanceConfig {
    /// Overlay `overrides` on top of this configuration. Fields set in
    /// `overrides` win; unset fields keep their current value.
    pub fn merge(&self, overrides: &InstanceConfig) -> InstanceConfig {
        InstanceConfig {
            name: overrides.name.clone().or_else(|| self.name.clone()),
            port: overrides.port.or(self.port),
            root_password: overrides
                .root_password
                .clone()
                .or_else(|| self.root_password.clone()),
            credential_file: overrides
                .credential_file
                .clone()
                .or_else(|| self.credential_file.clone()),
        }
    }

    /// Resolve into concrete options, filling in defaults
    pub fn resolve(&self, name: Option<&str>) -> Result<InstanceOptions> {
        let root_password = self
            .root_password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Config("instance.root_password cannot be empty".into()))?;

        let name = match name {
            Some(n) => n.to_string(),
            None => self.name.clone().unwrap_or_else(default_instance_name),
        };

        Ok(InstanceOptions {
            name,
            port: self.port.unwrap_or_else(default_db_port),
            root_password,
            credential_file: self
                .credential_file
                .clone()
                .unwrap_or_else(default_credential_file),
        })
    }
}

impl InstanceOptions {
    /// systemd unit and service name of the instance
    pub fn service_name(&self) -> String {
        format!("mysql-{}", self.name)
    }

    /// Instance configuration directory
    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(format!("/etc/mysql-{}", self.name))
    }

    /// Directory holding the instance's config fragments
    pub fn include_dir(&self) -> PathBuf {
        self.config_dir().join("conf.d")
    }

    /// Log directory of the instance
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(format!("/var/log/mysql-{}", self.name))
    }
}

impl ReplicationConfig {
    /// Overlay `overrides` on top of this configuration
    pub fn merge(&self, overrides: &ReplicationOverrides) -> ReplicationConfig {
        ReplicationConfig {
            role: overrides.role.unwrap_or(self.role),
            server_id: overrides.server_id.or(self.server_id),
            password: overrides.password.clone().or_else(|| self.password.clone()),
            master_host: overrides
                .master_host
                .clone()
                .or_else(|| self.master_host.clone()),
            master_port: overrides.master_port.or(self.master_port),
        }
    }

    /// Build the typed replication role.
    ///
    /// A slave without a master host is rejected here, before any step of
    /// the convergence pass has run.
    pub fn role(&self) -> Result<ReplicationRole> {
        let password = self
            .password
            .clone()
            .unwrap_or_else(default_replication_password);

        match self.role {
            RoleKind::Master => Ok(ReplicationRole::Master {
                server_id: self.server_id.unwrap_or(1),
                password,
            }),
            RoleKind::Slave => {
                let master = MasterEndpoint::new(
                    self.master_host.as_deref().unwrap_or_default(),
                    self.master_port,
                )?;
                Ok(ReplicationRole::Slave {
                    server_id: self.server_id.unwrap_or(2),
                    password,
                    master,
                })
            }
        }
    }
}

/// Command-line overrides for the replication section
#[derive(Debug, Clone, Default)]
pub struct ReplicationOverrides {
    pub role: Option<RoleKind>,
    pub server_id: Option<u32>,
    pub password: Option<String>,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
}

impl ReplicationOverrides {
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.server_id.is_none()
            && self.password.is_none()
            && self.master_host.is_none()
            && self.master_port.is_none()
    }
}

impl ConvergeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: ConvergeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.instance.name {
            if name.is_empty() || name.contains('/') {
                return Err(Error::Config(format!("invalid instance.name '{}'", name)));
            }
        }

        if self.instance.port == Some(0) {
            return Err(Error::Config("instance.port cannot be 0".into()));
        }

        if self.tmpdir.enabled && !self.tmpdir.path.is_absolute() {
            return Err(Error::Config("tmpdir.path must be absolute".into()));
        }

        if self.charset.charset.is_empty() || self.charset.collation.is_empty() {
            return Err(Error::Config("charset and collation cannot be empty".into()));
        }

        if let Some(replication) = &self.replication {
            if replication.server_id == Some(0) {
                return Err(Error::Config("replication.server_id cannot be 0".into()));
            }
        }

        Ok(())
    }

    /// Apply command-line overrides, producing a new configuration
    pub fn with_overrides(
        &self,
        instance: &InstanceConfig,
        replication: &ReplicationOverrides,
    ) -> Result<Self> {
        let mut config = self.clone();
        config.instance = self.instance.merge(instance);

        if !replication.is_empty() {
            config.replication = match &self.replication {
                Some(existing) => Some(existing.merge(replication)),
                None => {
                    let role = replication.role.ok_or_else(|| {
                        Error::Config("replication overrides require a role".into())
                    })?;
                    let base = ReplicationConfig {
                        role,
                        server_id: None,
                        password: None,
                        master_host: None,
                        master_port: None,
                    };
                    Some(base.merge(replication))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Typed replication role, if replication is configured
    pub fn replication_role(&self) -> Result<Option<ReplicationRole>> {
        self.replication.as_ref().map(|r| r.role()).transpose()
    }

    /// Resolve the instance options. With replication configured the
    /// instance is named after the role (`master-1`, `slave-2`, ...).
    pub fn instance_options(&self) -> Result<InstanceOptions> {
        match self.replication_role()? {
            Some(role) => self.instance.resolve(Some(&role.instance_name())),
            None => self.instance.resolve(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[instance]
name = "main"
root_password = "secret"

[tmpdir]
enabled = true
size = "512M"

[tuning]
max_connections = 300
expire_logs_days = 7

[tuning.overrides]
innodb_flush_log_at_trx_commit = "2"

[database]
backend = "native"
"#;

        let config = ConvergeConfig::from_str(toml).unwrap();
        assert_eq!(config.instance.name.as_deref(), Some("main"));
        assert!(config.tmpdir.enabled);
        assert_eq!(config.tmpdir.path, PathBuf::from("/var/mysqltmp"));
        assert_eq!(config.tmpdir.size, "512M");
        assert_eq!(config.charset.charset, "utf8");
        assert_eq!(config.charset.collation, "utf8_general_ci");
        assert_eq!(config.tuning.max_connections, Some(300));
        assert_eq!(config.tuning.overrides.len(), 1);
        assert_eq!(config.database.backend, SessionBackend::Native);
        assert!(config.replication.is_none());
    }

    #[test]
    fn test_port_defaults_to_3306() {
        let config = ConvergeConfig::from_str(
            r#"
[instance]
root_password = "secret"
"#,
        )
        .unwrap();

        let options = config.instance_options().unwrap();
        assert_eq!(options.port, 3306);
        assert_eq!(options.name, "default");
        assert_eq!(options.credential_file, PathBuf::from("/root/.my.cnf"));
        assert_eq!(options.include_dir(), PathBuf::from("/etc/mysql-default/conf.d"));
    }

    #[test]
    fn test_missing_root_password_is_rejected() {
        let config = ConvergeConfig::from_str("[instance]\nport = 3307\n").unwrap();
        assert!(matches!(config.instance_options(), Err(Error::Config(_))));
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = InstanceConfig {
            name: Some("main".into()),
            port: Some(3306),
            root_password: Some("old".into()),
            credential_file: None,
        };
        let overrides = InstanceConfig {
            port: Some(3307),
            root_password: Some("new".into()),
            ..Default::default()
        };

        let merged = base.merge(&overrides);
        assert_eq!(merged.name.as_deref(), Some("main"));
        assert_eq!(merged.port, Some(3307));
        assert_eq!(merged.root_password.as_deref(), Some("new"));
        assert!(merged.credential_file.is_none());
    }

    #[test]
    fn test_replication_role_defaults() {
        let config = ConvergeConfig::from_str(
            r#"
[instance]
root_password = "secret"

[replication]
role = "master"
"#,
        )
        .unwrap();

        let role = config.replication_role().unwrap().unwrap();
        assert_eq!(role.server_id(), 1);
        assert_eq!(role.password(), "repl");
        assert_eq!(config.instance_options().unwrap().name, "master-1");
    }

    #[test]
    fn test_slave_without_master_host_is_rejected() {
        let config = ConvergeConfig::from_str(
            r#"
[instance]
root_password = "secret"

[replication]
role = "slave"
"#,
        )
        .unwrap();

        assert!(matches!(
            config.replication_role(),
            Err(Error::MissingMasterHost)
        ));
        assert!(matches!(
            config.instance_options(),
            Err(Error::MissingMasterHost)
        ));
    }

    #[test]
    fn test_replication_overrides() {
        let config = ConvergeConfig::from_str(
            r#"
[instance]
root_password = "secret"
"#,
        )
        .unwrap();

        let overrides = ReplicationOverrides {
            role: Some(RoleKind::Slave),
            master_host: Some("db1".into()),
            ..Default::default()
        };
        let config = config
            .with_overrides(&InstanceConfig::default(), &overrides)
            .unwrap();

        let options = config.instance_options().unwrap();
        assert_eq!(options.name, "slave-2");

        let missing_role = ReplicationOverrides {
            master_host: Some("db1".into()),
            ..Default::default()
        };
        let base = ConvergeConfig::from_str("[instance]\nroot_password = \"x\"\n").unwrap();
        assert!(base
            .with_overrides(&InstanceConfig::default(), &missing_role)
            .is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ConvergeConfig::from_str("[instance]\nname = \"a/b\"\n").is_err());
        assert!(ConvergeConfig::from_str("[instance]\nport = 0\n").is_err());
        assert!(ConvergeConfig::from_str(
            "[instance]\n[tmpdir]\nenabled = true\npath = \"relative\"\n"
        )
        .is_err());
    }
}
