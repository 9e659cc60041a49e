//! Native MySQL session
//!
//! Talks to the instance over the MySQL protocol with a small sqlx pool.

use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, MySqlPool, Row as _};

use super::{Row, SqlSession};
use crate::config::{DatabaseConfig, InstanceOptions};
use crate::error::{Error, Result};

/// Session backed by a sqlx connection pool
pub struct MySqlSession {
    pool: MySqlPool,
}

impl MySqlSession {
    /// Create a session that connects on first use.
    ///
    /// The instance may not be running yet when the session is created.
    pub fn connect_lazy(config: &DatabaseConfig, options: &InstanceOptions) -> Result<Self> {
        let connect = MySqlConnectOptions::new()
            .host(&config.host)
            .port(options.port)
            .username("root")
            .password(&options.root_password);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy_with(connect);

        Ok(Self { pool })
    }
}

/// Convert a text-protocol row into a typed row
fn convert_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = row
            .try_get_unchecked::<Option<Vec<u8>>, _>(i)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        out.push(column.name(), value);
    }
    out
}

/// Errors reported by the server keep the statement for context; anything
/// else (connect, pool, I/O) is a database error
fn statement_error(action: &str, sql: &str, e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::Database(db) => {
            Error::QueryExecution(format!("Failed to {} '{}...': {}", action, truncate(sql), db))
        }
        other => Error::Database(other),
    }
}

fn truncate(sql: &str) -> &str {
    match sql.char_indices().nth(50) {
        Some((i, _)) => &sql[..i],
        None => sql,
    }
}

#[async_trait::async_trait]
impl SqlSession for MySqlSession {
    async fn execute(&self, sql: &str) -> Result<()> {
        tracing::debug!("Executing: {}", truncate(sql));

        // Plain &str statements go over the text protocol; CHANGE MASTER TO
        // and friends cannot be prepared on every server version.
        self.pool
            .execute(sql)
            .await
            .map_err(|e| statement_error("execute", sql, e))?;

        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        tracing::debug!("Querying: {}", truncate(sql));

        let rows = self
            .pool
            .fetch_all(sql)
            .await
            .map_err(|e| statement_error("query", sql, e))?;

        Ok(rows.iter().map(convert_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(60);
        assert_eq!(truncate(&long).chars().count(), 50);
        assert_eq!(truncate("SHOW SLAVE STATUS"), "SHOW SLAVE STATUS");
    }

    #[tokio::test]
    async fn test_lazy_session_does_not_connect() {
        let options = InstanceOptions {
            name: "default".into(),
            port: 1,
            root_password: "secret".into(),
            credential_file: "/root/.my.cnf".into(),
        };
        let config = DatabaseConfig {
            connect_timeout_secs: 1,
            ..Default::default()
        };

        let session = MySqlSession::connect_lazy(&config, &options).unwrap();
        let err = session.query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.is_retryable());
    }
}
