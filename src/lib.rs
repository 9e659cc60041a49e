//! myconverge - MySQL instance convergence
//!
//! Declares the desired state of a MySQL server (instance, tuning, charset,
//! credentials, optional master/slave replication) and converges a machine
//! towards it in a single sequential pass.
//!
//! # Architecture
//!
//! All side effects go through two seams: a [`host::Host`] for files,
//! mounts and services, and a [`sql::SqlSession`] for statements sent to the
//! instance. The steps themselves only decide what should exist and probe
//! before they change anything, so a second pass is a no-op.
//!
//! # Steps
//!
//! - Provisioner: tmpfs tmpdir, AppArmor profile, service, tuning, charset,
//!   root credential file
//! - Replication configurer: role option file and replication user
//! - Slave bootstrapper: one-time `CHANGE MASTER TO ...; START SLAVE;`

pub mod config;
pub mod converge;
pub mod error;
pub mod host;
pub mod provision;
pub mod replication;
pub mod sql;
pub mod tuning;

pub use config::ConvergeConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConvergeConfig, InstanceOptions};
    pub use crate::converge::{ConvergeReport, Converger, StepOutcome};
    pub use crate::error::{Error, Result};
    pub use crate::host::{Host, MemoryHost, SystemHost};
    pub use crate::replication::{MasterEndpoint, ReplicationRole};
    pub use crate::sql::{MemorySession, SqlSession};
}
