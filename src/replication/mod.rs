//! Replication Module
//!
//! Configures an instance as a replication master or slave: provisions it,
//! renders the role's option file, creates the replication user and, for a
//! slave, attaches it to its master.

mod bootstrap;
mod templates;
mod user;

pub use bootstrap::{
    bootstrap_script, bootstrap_slave, bootstrap_statements, change_master_statement,
    probe_slave_state, SlaveState, IO_STATE_FIELD, SLAVE_STATUS_PROBE, START_SLAVE,
};
pub use templates::{render_role_config, REPLICATION_FILE};
pub use user::{
    create_user_statements, ensure_replication_user, replication_user_exists, USER_PROBE,
};

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{InstanceOptions, RoleKind};
use crate::converge::RunContext;
use crate::error::{Error, Result};
use crate::provision;

/// Account used by slaves to connect to their master
pub const REPLICATION_USER: &str = "repl";

// Step names as they appear in the pass report
pub const REPLICATION_CONFIG: &str = "replication-config";
pub const REPLICATION_USER_STEP: &str = "replication-user";
pub const SLAVE_BOOTSTRAP: &str = "slave-bootstrap";

/// Where a slave replicates from. The host is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterEndpoint {
    host: String,
    port: Option<u16>,
}

impl MasterEndpoint {
    pub fn new(host: &str, port: Option<u16>) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::MissingMasterHost);
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Replication role of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationRole {
    Master {
        server_id: u32,
        password: String,
    },
    Slave {
        server_id: u32,
        password: String,
        master: MasterEndpoint,
    },
}

impl ReplicationRole {
    pub fn kind(&self) -> RoleKind {
        match self {
            ReplicationRole::Master { .. } => RoleKind::Master,
            ReplicationRole::Slave { .. } => RoleKind::Slave,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind() {
            RoleKind::Master => "master",
            RoleKind::Slave => "slave",
        }
    }

    pub fn server_id(&self) -> u32 {
        match self {
            ReplicationRole::Master { server_id, .. } | ReplicationRole::Slave { server_id, .. } => {
                *server_id
            }
        }
    }

    /// Password of the replication user
    pub fn password(&self) -> &str {
        match self {
            ReplicationRole::Master { password, .. } | ReplicationRole::Slave { password, .. } => {
                password
            }
        }
    }

    /// Instance name derived from the role, e.g. `slave-2`
    pub fn instance_name(&self) -> String {
        format!("{}-{}", self.kind_name(), self.server_id())
    }
}

/// Metadata recorded for a replicated instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceMetadata {
    pub instance: String,
    pub log_dir: PathBuf,
}

/// Provision an instance and configure it for its replication role
pub async fn configure(
    ctx: &mut RunContext<'_>,
    role: &ReplicationRole,
    options: &InstanceOptions,
) -> Result<InstanceMetadata> {
    provision::provision(ctx, options).await?;

    let metadata = InstanceMetadata {
        instance: options.name.clone(),
        log_dir: options.log_dir(),
    };

    let content = render_role_config(role, &options.name, &metadata.log_dir);
    let changed = ctx
        .host
        .write_file(&options.include_dir().join(REPLICATION_FILE), &content, 0o644)
        .await?;

    if changed {
        // The user and CHANGE MASTER TO steps need the server running with
        // its replication settings.
        ctx.notify_immediate(&options.service_name()).await?;
    }
    ctx.record_change(REPLICATION_CONFIG, changed);

    ensure_replication_user(ctx, role.password()).await?;

    Ok(metadata)
}
