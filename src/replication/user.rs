//! Replication user

use super::{REPLICATION_USER, REPLICATION_USER_STEP};
use crate::converge::{RunContext, StepOutcome};
use crate::error::Result;
use crate::sql::{quote_account, quote_literal, SqlSession};

/// Query listing the server's accounts
pub const USER_PROBE: &str = "SELECT User, Host FROM mysql.user";

/// Whether the replication user exists, for any host.
///
/// Matches the `User` column exactly, so `replicator` or `repl_ro` do not
/// count.
pub async fn replication_user_exists(session: &dyn SqlSession) -> Result<bool> {
    let rows = session.query(USER_PROBE).await?;
    Ok(rows.iter().any(|row| row.get("User") == Some(REPLICATION_USER)))
}

/// Statements creating the replication user and granting it replication
pub fn create_user_statements(password: &str) -> Vec<String> {
    let account = quote_account(REPLICATION_USER, "%");
    vec![
        format!("CREATE USER {} IDENTIFIED BY {}", account, quote_literal(password)),
        format!("GRANT REPLICATION SLAVE ON *.* TO {}", account),
    ]
}

/// Create the replication user unless it already exists
pub async fn ensure_replication_user(ctx: &mut RunContext<'_>, password: &str) -> Result<bool> {
    if replication_user_exists(ctx.session).await? {
        ctx.record(
            REPLICATION_USER_STEP,
            StepOutcome::skipped("replication user already exists"),
        );
        return Ok(false);
    }

    for statement in create_user_statements(password) {
        ctx.session.execute(&statement).await?;
    }

    tracing::info!(user = REPLICATION_USER, "Created replication user");
    ctx.record(REPLICATION_USER_STEP, StepOutcome::Applied);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvergeConfig;
    use crate::host::{MemoryHost, Platform};
    use crate::sql::MemorySession;

    #[test]
    fn test_statements_escape_password() {
        let statements = create_user_statements("pa'ss");
        assert_eq!(
            statements,
            vec![
                "CREATE USER 'repl'@'%' IDENTIFIED BY 'pa''ss'".to_string(),
                "GRANT REPLICATION SLAVE ON *.* TO 'repl'@'%'".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_probe_requires_exact_user() {
        let session = MemorySession::new()
            .with_user("replicator", "%")
            .with_user("mysql.sys", "localhost");
        assert!(!replication_user_exists(&session).await.unwrap());

        let session = MemorySession::new().with_user("repl", "10.0.0.%");
        assert!(replication_user_exists(&session).await.unwrap());
    }

    #[tokio::test]
    async fn test_creating_twice_creates_once() {
        let config = ConvergeConfig::from_str("[instance]\nroot_password = \"x\"\n").unwrap();
        let host = MemoryHost::new(Platform::Other);
        let session = MemorySession::new();
        let mut ctx = RunContext::new(&host, &session, &config, None, "master-1", None);

        assert!(ensure_replication_user(&mut ctx, "secret").await.unwrap());
        assert!(!ensure_replication_user(&mut ctx, "secret").await.unwrap());

        let creates = session
            .statements()
            .await
            .into_iter()
            .filter(|s| s.starts_with("CREATE USER"))
            .count();
        assert_eq!(creates, 1);
        assert!(session.has_user("repl", "%").await);

        let report = ctx.finish();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].outcome, StepOutcome::Applied);
        assert_eq!(
            report.steps[1].outcome,
            StepOutcome::skipped("replication user already exists")
        );
    }
}
