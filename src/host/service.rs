//! Database service layout and rendering

use std::path::PathBuf;

use serde::Serialize;

use crate::config::InstanceOptions;
use crate::sql::quote_literal;

/// A database service instance to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    /// Instance name
    pub instance: String,
    /// Listening port
    pub port: u16,
    /// Root password set when the data directory is initialized
    #[serde(skip)]
    pub initial_root_password: String,
    /// Server temporary directory, when a dedicated one is mounted
    pub tmp_dir: Option<PathBuf>,
}

impl ServiceSpec {
    pub fn new(options: &InstanceOptions, tmp_dir: Option<PathBuf>) -> Self {
        Self {
            instance: options.name.clone(),
            port: options.port,
            initial_root_password: options.root_password.clone(),
            tmp_dir,
        }
    }

    /// systemd unit name
    pub fn service_name(&self) -> String {
        format!("mysql-{}", self.instance)
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(format!("/etc/mysql-{}", self.instance))
    }

    pub fn include_dir(&self) -> PathBuf {
        self.config_dir().join("conf.d")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("my.cnf")
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(format!("/var/lib/mysql-{}", self.instance))
    }

    pub fn run_dir(&self) -> PathBuf {
        PathBuf::from(format!("/run/mysql-{}", self.instance))
    }

    pub fn socket(&self) -> PathBuf {
        self.run_dir().join("mysqld.sock")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(format!("/var/log/mysql-{}", self.instance))
    }

    pub fn unit_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/etc/systemd/system/{}.service",
            self.service_name()
        ))
    }
}

/// Render the instance's main option file
pub fn render_base_config(spec: &ServiceSpec) -> String {
    let tmp_dir = spec.tmp_dir.clone().unwrap_or_else(|| PathBuf::from("/tmp"));

    format!(
        "# Managed by myconverge\n\
         \n\
         [client]\n\
         port = {port}\n\
         socket = {socket}\n\
         \n\
         [mysqld]\n\
         user = mysql\n\
         port = {port}\n\
         bind-address = 0.0.0.0\n\
         socket = {socket}\n\
         pid-file = {run_dir}/mysqld.pid\n\
         datadir = {data_dir}\n\
         tmpdir = {tmp_dir}\n\
         log-error = {log_dir}/error.log\n\
         \n\
         !includedir {include_dir}\n",
        port = spec.port,
        socket = spec.socket().display(),
        run_dir = spec.run_dir().display(),
        data_dir = spec.data_dir().display(),
        tmp_dir = tmp_dir.display(),
        log_dir = spec.log_dir().display(),
        include_dir = spec.include_dir().display(),
    )
}

/// Render the instance's systemd unit
pub fn render_unit(spec: &ServiceSpec) -> String {
    format!(
        "# Managed by myconverge\n\
         [Unit]\n\
         Description=MySQL instance {instance}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User=mysql\n\
         Group=mysql\n\
         RuntimeDirectory=mysql-{instance}\n\
         ExecStart=/usr/sbin/mysqld --defaults-file={config}\n\
         LimitNOFILE=65535\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        instance = spec.instance,
        config = spec.config_file().display(),
    )
}

/// SQL run once while the data directory is initialized
pub(crate) fn render_init_sql(spec: &ServiceSpec) -> String {
    let password = quote_literal(&spec.initial_root_password);
    format!(
        "ALTER USER 'root'@'localhost' IDENTIFIED BY {password};\n\
         CREATE USER IF NOT EXISTS 'root'@'127.0.0.1' IDENTIFIED BY {password};\n\
         GRANT ALL PRIVILEGES ON *.* TO 'root'@'127.0.0.1' WITH GRANT OPTION;\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ServiceSpec {
        ServiceSpec {
            instance: "master-1".into(),
            port: 3307,
            initial_root_password: "it's".into(),
            tmp_dir: Some(PathBuf::from("/var/mysqltmp")),
        }
    }

    #[test]
    fn test_layout() {
        let spec = spec();
        assert_eq!(spec.service_name(), "mysql-master-1");
        assert_eq!(spec.include_dir(), PathBuf::from("/etc/mysql-master-1/conf.d"));
        assert_eq!(
            spec.unit_path(),
            PathBuf::from("/etc/systemd/system/mysql-master-1.service")
        );
    }

    #[test]
    fn test_base_config() {
        let config = render_base_config(&spec());
        assert!(config.contains("port = 3307\n"));
        assert!(config.contains("tmpdir = /var/mysqltmp\n"));
        assert!(config.contains("datadir = /var/lib/mysql-master-1\n"));
        assert!(config.ends_with("!includedir /etc/mysql-master-1/conf.d\n"));
    }

    #[test]
    fn test_init_sql_escapes_password() {
        let sql = render_init_sql(&spec());
        assert!(sql.contains("IDENTIFIED BY 'it''s';"));
        assert!(!sql.contains("'it's'"));
    }
}
