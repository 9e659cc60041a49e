//! Role option files

use std::path::Path;

use super::ReplicationRole;

/// Option file name in the include directory
pub const REPLICATION_FILE: &str = "replication.cnf";

/// Render the option file for a replication role
pub fn render_role_config(role: &ReplicationRole, instance: &str, log_dir: &Path) -> String {
    let logs = log_dir.display();
    let mut out = format!(
        "# Managed by myconverge\n\
         # Replication {} settings for instance {}\n\
         \n\
         [mysqld]\n\
         server-id = {}\n",
        role.kind_name(),
        instance,
        role.server_id(),
    );

    match role {
        ReplicationRole::Master { .. } => {
            out.push_str(&format!(
                "log_bin = {logs}/mysql-bin.log\n\
                 log_bin_index = {logs}/mysql-bin.log.index\n\
                 binlog_format = ROW\n\
                 sync_binlog = 1\n"
            ));
        }
        ReplicationRole::Slave { .. } => {
            out.push_str(&format!(
                "relay-log = {logs}/mysql-relay-bin.log\n\
                 relay-log-index = {logs}/mysql-relay-bin.index\n\
                 read_only = 1\n"
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::MasterEndpoint;

    #[test]
    fn test_master_template() {
        let role = ReplicationRole::Master {
            server_id: 1,
            password: "repl".into(),
        };
        let content = render_role_config(&role, "master-1", Path::new("/var/log/mysql-master-1"));

        assert!(content.contains("instance master-1\n"));
        assert!(content.contains("server-id = 1\n"));
        assert!(content.contains("log_bin = /var/log/mysql-master-1/mysql-bin.log\n"));
        assert!(!content.contains("relay-log"));
    }

    #[test]
    fn test_slave_template() {
        let role = ReplicationRole::Slave {
            server_id: 2,
            password: "repl".into(),
            master: MasterEndpoint::new("db1", None).unwrap(),
        };
        let content = render_role_config(&role, "slave-2", Path::new("/var/log/mysql-slave-2"));

        assert!(content.contains("server-id = 2\n"));
        assert!(content.contains("relay-log = /var/log/mysql-slave-2/mysql-relay-bin.log\n"));
        assert!(content.contains("read_only = 1\n"));
        assert!(!content.contains("log_bin"));
    }
}
