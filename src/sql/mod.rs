//! SQL Session Module
//!
//! Sends statements to the instance being converged and returns typed rows,
//! so idempotency probes check column values instead of matching text.

mod client;
mod memory;
mod mysql;

use std::fmt::Write;

pub use client::ClientSession;
pub use memory::MemorySession;
pub use mysql::MySqlSession;

use crate::config::{DatabaseConfig, InstanceOptions, SessionBackend};
use crate::error::Result;

/// A result row: column names with nullable text values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column
    pub fn with(mut self, column: &str, value: Option<&str>) -> Self {
        self.push(column, value.map(str::to_string));
        self
    }

    pub fn push(&mut self, column: &str, value: Option<String>) {
        self.columns.push((column.to_string(), value));
    }

    /// Value of a column; `None` when the column is missing or NULL
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .and_then(|(_, value)| value.as_deref())
    }

    /// Whether the row has a column, NULL or not
    pub fn has_column(&self, column: &str) -> bool {
        self.columns
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(column))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A connection to the instance
#[async_trait::async_trait]
pub trait SqlSession: Send + Sync {
    /// Execute one statement
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run one statement and return its rows
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Quote a string as a SQL literal. A single quote is doubled, which holds
/// in every `sql_mode`; the other special characters get backslash escapes.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Quote a `'user'@'host'` account name
pub fn quote_account(user: &str, host: &str) -> String {
    let mut out = quote_literal(user);
    let _ = write!(out, "@{}", quote_literal(host));
    out
}

/// Open the session configured for an instance
pub async fn open_session(
    config: &DatabaseConfig,
    options: &InstanceOptions,
) -> Result<Box<dyn SqlSession>> {
    match config.backend {
        SessionBackend::Client => {
            tracing::debug!(
                binary = %config.client_binary.display(),
                defaults_file = %options.credential_file.display(),
                "Using mysql client session"
            );
            Ok(Box::new(ClientSession::new(
                config.client_binary.clone(),
                options.credential_file.clone(),
            )))
        }
        SessionBackend::Native => {
            tracing::debug!(host = %config.host, port = options.port, "Using native session");
            Ok(Box::new(MySqlSession::connect_lazy(config, options)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("secret"), "'secret'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("''"), "''''''");
        assert_eq!(quote_literal("a\\b"), "'a\\\\b'");
        assert_eq!(quote_literal("x'; DROP USER root; --"), "'x''; DROP USER root; --'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_quote_account() {
        assert_eq!(quote_account("repl", "%"), "'repl'@'%'");
    }

    #[test]
    fn test_row_lookup() {
        let row = Row::new()
            .with("User", Some("repl"))
            .with("Host", Some("%"))
            .with("Last_Error", None);

        assert_eq!(row.get("user"), Some("repl"));
        assert_eq!(row.get("Host"), Some("%"));
        assert_eq!(row.get("Last_Error"), None);
        assert!(row.has_column("Last_Error"));
        assert!(!row.has_column("Slave_IO_State"));
        assert_eq!(row.len(), 3);
    }
}
