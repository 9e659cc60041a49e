//! Slave bootstrap
//!
//! Attaches a slave to its master once. The slave status is probed first:
//! a slave that already reports a `Slave_IO_State` is attached and left
//! alone.

use super::{MasterEndpoint, REPLICATION_USER, SLAVE_BOOTSTRAP};
use crate::converge::{RunContext, StepOutcome};
use crate::error::Result;
use crate::sql::{quote_literal, SqlSession};

pub const SLAVE_STATUS_PROBE: &str = "SHOW SLAVE STATUS";

/// Status field whose presence means the slave is attached
pub const IO_STATE_FIELD: &str = "Slave_IO_State";

pub const START_SLAVE: &str = "START SLAVE";

/// Attachment state of a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    NotAttached,
    Attached,
}

/// Read the slave state from `SHOW SLAVE STATUS`
pub async fn probe_slave_state(session: &dyn SqlSession) -> Result<SlaveState> {
    let rows = session.query(SLAVE_STATUS_PROBE).await?;
    if rows.iter().any(|row| row.has_column(IO_STATE_FIELD)) {
        Ok(SlaveState::Attached)
    } else {
        Ok(SlaveState::NotAttached)
    }
}

/// `CHANGE MASTER TO ...` for a master; `MASTER_PORT` only when known
pub fn change_master_statement(master: &MasterEndpoint, password: &str) -> String {
    let mut options = vec![format!("MASTER_HOST={}", quote_literal(master.host()))];
    if let Some(port) = master.port() {
        options.push(format!("MASTER_PORT={}", port));
    }
    options.push(format!("MASTER_USER={}", quote_literal(REPLICATION_USER)));
    options.push(format!("MASTER_PASSWORD={}", quote_literal(password)));

    format!("CHANGE MASTER TO {}", options.join(", "))
}

/// The statements attaching a slave, in order
pub fn bootstrap_statements(master: &MasterEndpoint, password: &str) -> Vec<String> {
    vec![
        change_master_statement(master, password),
        START_SLAVE.to_string(),
    ]
}

/// The bootstrap as one script, each statement terminated by `;`
pub fn bootstrap_script(master: &MasterEndpoint, password: &str) -> String {
    bootstrap_statements(master, password)
        .iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Attach the slave to its master unless it is already attached
pub async fn bootstrap_slave(
    ctx: &mut RunContext<'_>,
    master: &MasterEndpoint,
    password: &str,
) -> Result<SlaveState> {
    if probe_slave_state(ctx.session).await? == SlaveState::Attached {
        ctx.record(SLAVE_BOOTSTRAP, StepOutcome::skipped("slave already attached"));
        return Ok(SlaveState::Attached);
    }

    for statement in bootstrap_statements(master, password) {
        ctx.session.execute(&statement).await?;
    }

    tracing::info!(
        master_host = master.host(),
        master_port = ?master.port(),
        "Attached slave to master"
    );
    ctx.record(SLAVE_BOOTSTRAP, StepOutcome::Applied);
    Ok(SlaveState::Attached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvergeConfig;
    use crate::host::{MemoryHost, Platform};
    use crate::sql::{MemorySession, Row};

    fn master() -> MasterEndpoint {
        MasterEndpoint::new("db1", Some(3306)).unwrap()
    }

    #[test]
    fn test_bootstrap_script() {
        assert_eq!(
            bootstrap_script(&master(), "secret"),
            "CHANGE MASTER TO MASTER_HOST='db1', MASTER_PORT=3306, MASTER_USER='repl', MASTER_PASSWORD='secret'; START SLAVE;"
        );
    }

    #[test]
    fn test_port_is_optional() {
        let master = MasterEndpoint::new("db1", None).unwrap();
        assert_eq!(
            change_master_statement(&master, "secret"),
            "CHANGE MASTER TO MASTER_HOST='db1', MASTER_USER='repl', MASTER_PASSWORD='secret'"
        );
    }

    #[test]
    fn test_password_is_escaped_once() {
        let statement = change_master_statement(&master(), "it's\\");
        assert!(statement.ends_with("MASTER_PASSWORD='it''s\\\\'"));
    }

    #[tokio::test]
    async fn test_probe_states() {
        let session = MemorySession::new();
        assert_eq!(
            probe_slave_state(&session).await.unwrap(),
            SlaveState::NotAttached
        );

        let session = MemorySession::new().with_master("db1", None);
        assert_eq!(
            probe_slave_state(&session).await.unwrap(),
            SlaveState::Attached
        );
    }

    #[test]
    fn test_io_state_column_decides() {
        let attached = Row::new().with(IO_STATE_FIELD, Some(""));
        assert!(attached.has_column(IO_STATE_FIELD));
        assert!(!Row::new().with("Master_Host", Some("db1")).has_column(IO_STATE_FIELD));
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once() {
        let config = ConvergeConfig::from_str("[instance]\nroot_password = \"x\"\n").unwrap();
        let host = MemoryHost::new(Platform::Other);
        let session = MemorySession::new();
        let mut ctx = RunContext::new(&host, &session, &config, None, "slave-2", None);

        bootstrap_slave(&mut ctx, &master(), "secret").await.unwrap();
        bootstrap_slave(&mut ctx, &master(), "secret").await.unwrap();

        assert_eq!(
            session.statements().await,
            vec![
                "CHANGE MASTER TO MASTER_HOST='db1', MASTER_PORT=3306, MASTER_USER='repl', MASTER_PASSWORD='secret'".to_string(),
                "START SLAVE".to_string(),
            ]
        );
        assert_eq!(session.master().await, Some(("db1".to_string(), Some(3306))));

        let report = ctx.finish();
        assert_eq!(report.outcome(SLAVE_BOOTSTRAP), Some(&StepOutcome::Applied));
        assert_eq!(
            report.steps[1].outcome,
            StepOutcome::skipped("slave already attached")
        );
    }
}
