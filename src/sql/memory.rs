//! In-memory session
//!
//! Understands the handful of statements a convergence pass sends (user
//! creation, grants, CHANGE MASTER TO, START SLAVE, and the probes) and
//! keeps a log of everything executed. Used for `plan` dry runs and tests.

use std::collections::BTreeSet;

use tokio::sync::Mutex;

use super::{Row, SqlSession};
use crate::error::{Error, Result};

#[derive(Debug)]
struct MemoryDb {
    users: BTreeSet<(String, String)>,
    master: Option<(String, Option<u16>)>,
    slave_running: bool,
    statements: Vec<String>,
}

/// Session backed by a simulated server
pub struct MemorySession {
    db: Mutex<MemoryDb>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    /// A fresh server with only `root@localhost`
    pub fn new() -> Self {
        let mut users = BTreeSet::new();
        users.insert(("root".to_string(), "localhost".to_string()));
        Self {
            db: Mutex::new(MemoryDb {
                users,
                master: None,
                slave_running: false,
                statements: Vec::new(),
            }),
        }
    }

    /// Seed an existing account
    pub fn with_user(mut self, user: &str, host: &str) -> Self {
        self.db
            .get_mut()
            .users
            .insert((user.to_string(), host.to_string()));
        self
    }

    /// Seed a slave that is already attached to a master
    pub fn with_master(mut self, host: &str, port: Option<u16>) -> Self {
        let db = self.db.get_mut();
        db.master = Some((host.to_string(), port));
        db.slave_running = true;
        self
    }

    /// Every statement passed to `execute`, in order
    pub async fn statements(&self) -> Vec<String> {
        self.db.lock().await.statements.clone()
    }

    /// Whether an account exists
    pub async fn has_user(&self, user: &str, host: &str) -> bool {
        self.db
            .lock()
            .await
            .users
            .contains(&(user.to_string(), host.to_string()))
    }

    /// Master the simulated slave replicates from
    pub async fn master(&self) -> Option<(String, Option<u16>)> {
        self.db.lock().await.master.clone()
    }

    pub async fn slave_running(&self) -> bool {
        self.db.lock().await.slave_running
    }
}

/// Read a single-quoted literal at the start of `s`, returning the
/// unescaped value and the rest of the input
fn read_literal(s: &str) -> Option<(String, &str)> {
    let s = s.trim_start().strip_prefix('\'')?;
    let mut value = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    '0' => '\0',
                    'Z' => '\x1a',
                    other => other,
                });
            }
            '\'' if matches!(chars.peek(), Some((_, '\''))) => {
                chars.next();
                value.push('\'');
            }
            '\'' => return Some((value, &s[i + 1..])),
            c => value.push(c),
        }
    }
    None
}

fn parse_account(s: &str) -> Option<(String, String)> {
    let (user, rest) = read_literal(s)?;
    let rest = rest.trim_start().strip_prefix('@')?;
    let (host, _) = read_literal(rest)?;
    Some((user, host))
}

/// Value following `KEY=` in a CHANGE MASTER TO option list
fn option_value<'a>(sql: &'a str, key: &str) -> Option<&'a str> {
    let upper = sql.to_ascii_uppercase();
    let start = upper.find(&format!("{}=", key))? + key.len() + 1;
    Some(&sql[start..])
}

fn server_error(code: u16, message: String) -> Error {
    Error::QueryExecution(format!("ERROR {}: {}", code, message))
}

#[async_trait::async_trait]
impl SqlSession for MemorySession {
    async fn execute(&self, sql: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        db.statements.push(sql.to_string());

        let trimmed = sql.trim();
        let upper = trimmed.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("CREATE USER ") {
            let account = &trimmed[trimmed.len() - rest.len()..];
            let (user, host) = parse_account(account)
                .ok_or_else(|| server_error(1064, format!("syntax error near '{}'", account)))?;
            if !db.users.insert((user.clone(), host.clone())) {
                return Err(server_error(
                    1396,
                    format!("Operation CREATE USER failed for '{}'@'{}'", user, host),
                ));
            }
        } else if upper.starts_with("CHANGE MASTER TO") {
            let host = option_value(trimmed, "MASTER_HOST")
                .and_then(read_literal)
                .map(|(host, _)| host)
                .ok_or_else(|| server_error(1064, "MASTER_HOST is required".into()))?;
            let port = option_value(trimmed, "MASTER_PORT").and_then(|rest| {
                rest.split(|c: char| !c.is_ascii_digit())
                    .next()
                    .and_then(|p| p.parse().ok())
            });
            db.master = Some((host, port));
        } else if upper.starts_with("START SLAVE") {
            if db.master.is_none() {
                return Err(server_error(
                    1200,
                    "The server is not configured as slave".into(),
                ));
            }
            db.slave_running = true;
        }

        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let db = self.db.lock().await;
        let upper = sql.trim().to_ascii_uppercase();

        if upper.starts_with("SELECT") && upper.contains("MYSQL.USER") {
            return Ok(db
                .users
                .iter()
                .map(|(user, host)| {
                    Row::new()
                        .with("User", Some(user.as_str()))
                        .with("Host", Some(host.as_str()))
                })
                .collect());
        }

        if upper.starts_with("SHOW SLAVE STATUS") {
            return Ok(match &db.master {
                Some((host, port)) => {
                    let io_state = if db.slave_running {
                        "Waiting for master to send event"
                    } else {
                        ""
                    };
                    let port = port.unwrap_or(3306).to_string();
                    vec![Row::new()
                        .with("Slave_IO_State", Some(io_state))
                        .with("Master_Host", Some(host.as_str()))
                        .with("Master_User", Some("repl"))
                        .with("Master_Port", Some(port.as_str()))]
                }
                None => Vec::new(),
            });
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_literal() {
        assert_eq!(
            read_literal("'it\\'s' rest"),
            Some(("it's".to_string(), " rest"))
        );
        assert_eq!(
            read_literal("'it''s' rest"),
            Some(("it's".to_string(), " rest"))
        );
        assert_eq!(read_literal("'' rest"), Some((String::new(), " rest")));
        assert_eq!(read_literal("no quotes"), None);
        assert_eq!(read_literal("'unterminated"), None);
    }

    #[tokio::test]
    async fn test_duplicate_user_is_an_error() {
        let session = MemorySession::new();
        let sql = "CREATE USER 'repl'@'%' IDENTIFIED BY 'x'";

        session.execute(sql).await.unwrap();
        assert!(session.has_user("repl", "%").await);
        assert!(session.execute(sql).await.is_err());
    }

    #[tokio::test]
    async fn test_change_master_with_doubled_quotes() {
        let session = MemorySession::new();
        let statement = format!(
            "CHANGE MASTER TO MASTER_HOST={}, MASTER_USER='repl', MASTER_PASSWORD={}",
            crate::sql::quote_literal("db'1"),
            crate::sql::quote_literal("pa'ss"),
        );

        session.execute(&statement).await.unwrap();
        assert_eq!(session.master().await, Some(("db'1".to_string(), None)));
    }

    #[tokio::test]
    async fn test_change_master_then_start() {
        let session = MemorySession::new();
        assert!(session.execute("START SLAVE").await.is_err());
        assert!(session.query("SHOW SLAVE STATUS").await.unwrap().is_empty());

        session
            .execute("CHANGE MASTER TO MASTER_HOST='db1', MASTER_PORT=3307, MASTER_USER='repl', MASTER_PASSWORD='x'")
            .await
            .unwrap();
        session.execute("START SLAVE").await.unwrap();

        assert_eq!(session.master().await, Some(("db1".to_string(), Some(3307))));
        let rows = session.query("SHOW SLAVE STATUS").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Master_Host"), Some("db1"));
        assert_eq!(
            rows[0].get("Slave_IO_State"),
            Some("Waiting for master to send event")
        );
    }
}
