//! mysql client session
//!
//! Runs the `mysql` command-line client with the instance's credential
//! file. SQL is passed as a single argument, never through a shell.

use std::path::PathBuf;

use tokio::process::Command;

use super::{Row, SqlSession};
use crate::error::{Error, Result};

/// Session that shells out to the `mysql` binary
pub struct ClientSession {
    binary: PathBuf,
    defaults_file: PathBuf,
}

impl ClientSession {
    pub fn new(binary: PathBuf, defaults_file: PathBuf) -> Self {
        Self {
            binary,
            defaults_file,
        }
    }

    fn command(&self, sql: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--defaults-file={}", self.defaults_file.display()))
            .arg("--batch")
            .arg("-e")
            .arg(sql);
        cmd
    }

    async fn run(&self, sql: &str) -> Result<String> {
        let output = self.command(sql).output().await?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                program: self.binary.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Undo the escaping `mysql --batch` applies to field values
fn unescape_field(field: &str) -> Option<String> {
    if field == "NULL" {
        return None;
    }

    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Some(out)
}

/// Parse tab-separated batch output: a header line, then one line per row
pub(crate) fn parse_batch_output(output: &str) -> Vec<Row> {
    let mut lines = output.lines();
    let header: Vec<&str> = match lines.next() {
        Some(line) if !line.is_empty() => line.split('\t').collect(),
        _ => return Vec::new(),
    };

    lines
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut row = Row::new();
            let mut fields = line.split('\t');
            for column in &header {
                row.push(column, fields.next().and_then(unescape_field));
            }
            row
        })
        .collect()
}

#[async_trait::async_trait]
impl SqlSession for ClientSession {
    async fn execute(&self, sql: &str) -> Result<()> {
        tracing::debug!(defaults_file = %self.defaults_file.display(), "Executing via mysql client");
        self.run(sql).await?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        tracing::debug!(defaults_file = %self.defaults_file.display(), "Querying via mysql client");
        let stdout = self.run(sql).await?;
        Ok(parse_batch_output(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_table() {
        let output = "User\tHost\nmysql.sys\tlocalhost\nrepl\t%\nroot\tlocalhost\n";
        let rows = parse_batch_output(output);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].get("User"), Some("repl"));
        assert_eq!(rows[1].get("Host"), Some("%"));
    }

    #[test]
    fn test_parse_empty_result() {
        assert!(parse_batch_output("").is_empty());
    }

    #[test]
    fn test_parse_null_and_escapes() {
        let output = "Slave_IO_State\tLast_Error\tNote\nWaiting for master\tNULL\ta\\tb\\\\c\n";
        let rows = parse_batch_output(output);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Slave_IO_State"), Some("Waiting for master"));
        assert!(rows[0].has_column("Last_Error"));
        assert_eq!(rows[0].get("Last_Error"), None);
        assert_eq!(rows[0].get("Note"), Some("a\tb\\c"));
    }

    #[test]
    fn test_command_passes_sql_as_single_argument() {
        let session = ClientSession::new("/usr/bin/mysql".into(), "/root/.my.cnf".into());
        let cmd = session.command("SELECT 'a; b'");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec!["--defaults-file=/root/.my.cnf", "--batch", "-e", "SELECT 'a; b'"]
        );
    }

    #[tokio::test]
    async fn test_failing_client_reports_error() {
        let session = ClientSession::new("false".into(), "/nonexistent".into());
        let err = session.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
