//! Root credential file
//!
//! Writes a `[client]` option file so the `mysql` client (and the client
//! session) can log in as root without a password prompt.

use std::path::PathBuf;

use super::CREDENTIALS;
use crate::config::InstanceOptions;
use crate::converge::RunContext;
use crate::error::Result;
use crate::host::Host;

/// The file holds a plaintext password
pub const CREDENTIAL_FILE_MODE: u32 = 0o600;

/// Client credentials for an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFile {
    pub path: PathBuf,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl CredentialFile {
    /// Root credentials for a local instance
    pub fn root(options: &InstanceOptions) -> Self {
        Self {
            path: options.credential_file.clone(),
            password: options.root_password.clone(),
            host: "127.0.0.1".to_string(),
            port: options.port,
            user: "root".to_string(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[client]\npassword={}\nhost={}\nport={}\nuser={}\n",
            option_value(&self.password),
            self.host,
            self.port,
            option_value(&self.user),
        )
    }

    /// Write the file; returns whether it changed
    pub async fn write(&self, host: &dyn Host) -> Result<bool> {
        host.write_file(&self.path, &self.render(), CREDENTIAL_FILE_MODE)
            .await
    }
}

/// Quote an option file value when it would not survive unquoted
fn option_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | '\\' | '#' | ';'));
    if plain {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub(super) async fn apply(ctx: &mut RunContext<'_>, options: &InstanceOptions) -> Result<()> {
    let changed = CredentialFile::root(options).write(ctx.host).await?;
    ctx.record_change(CREDENTIALS, changed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryHost, Platform, SystemHost};

    fn options(password: &str) -> InstanceOptions {
        InstanceOptions {
            name: "default".into(),
            port: 3306,
            root_password: password.into(),
            credential_file: "/root/.my.cnf".into(),
        }
    }

    #[test]
    fn test_render_has_each_field_once() {
        let content = CredentialFile::root(&options("secret")).render();
        assert_eq!(
            content,
            "[client]\npassword=secret\nhost=127.0.0.1\nport=3306\nuser=root\n"
        );

        for field in ["password=", "host=", "port=", "user="] {
            assert_eq!(
                content.lines().filter(|l| l.starts_with(field)).count(),
                1,
                "{field}"
            );
        }
    }

    #[test]
    fn test_password_with_special_characters_is_quoted() {
        let content = CredentialFile::root(&options("a b#\"c")).render();
        assert!(content.contains("password=\"a b#\\\"c\"\n"));
    }

    #[tokio::test]
    async fn test_memory_write_uses_restrictive_mode() {
        let host = MemoryHost::new(Platform::Other);
        let file = CredentialFile::root(&options("secret"));

        assert!(file.write(&host).await.unwrap());
        assert!(!file.write(&host).await.unwrap());

        let (_, mode) = host.file("/root/.my.cnf").await.unwrap();
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn test_system_write_uses_restrictive_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut file = CredentialFile::root(&options("secret"));
        file.path = dir.path().join(".my.cnf");

        let host = SystemHost::with_platform(Platform::Other);
        assert!(file.write(&host).await.unwrap());

        let meta = std::fs::metadata(&file.path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&file.path).unwrap(), file.render());

        // overwritten on change
        file.password = "rotated".into();
        assert!(file.write(&host).await.unwrap());
        assert!(std::fs::read_to_string(&file.path)
            .unwrap()
            .contains("password=rotated\n"));
    }
}
