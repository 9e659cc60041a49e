//! AppArmor profile for the tmpfs directory
//!
//! Ubuntu's mysqld profile does not allow the server to use a temporary
//! directory outside of `/tmp`. A local include grants access to the
//! configured tmpdir. Only applied on Ubuntu, and never inside a container.

use std::path::{Path, PathBuf};

use super::APPARMOR;
use crate::converge::{RunContext, StepOutcome};
use crate::error::Result;
use crate::host::{Host, Platform};

/// Files whose joint presence marks a container
pub const CONTAINER_MARKERS: [&str; 2] = ["/.dockerenv", "/.dockerinit"];

/// Directory of the local mysqld profile includes
pub const PROFILE_DIR: &str = "/etc/apparmor.d/local/mysql";

pub const APPARMOR_SERVICE: &str = "apparmor";

/// Whether the host is a container (every marker file exists)
pub async fn in_container(host: &dyn Host) -> bool {
    for marker in CONTAINER_MARKERS {
        if !host.file_exists(Path::new(marker)).await {
            return false;
        }
    }
    true
}

fn profile_path(instance: &str) -> PathBuf {
    Path::new(PROFILE_DIR).join(format!("{}-tmpfs", instance))
}

/// Profile rules granting access to the tmpdir
pub fn render_profile(tmpdir: &Path) -> String {
    format!("{0}/ r,\n{0}/** rwk,\n", tmpdir.display())
}

pub(super) async fn configure(ctx: &mut RunContext<'_>, instance: &str, tmpdir: &Path) -> Result<()> {
    if in_container(ctx.host).await {
        ctx.record(APPARMOR, StepOutcome::skipped("running inside a container"));
        return Ok(());
    }

    let platform = ctx.host.platform();
    if platform != Platform::Ubuntu {
        ctx.record(
            APPARMOR,
            StepOutcome::skipped(format!("not supported on {}", platform)),
        );
        return Ok(());
    }

    let dir_changed = ctx.host.create_dir(Path::new(PROFILE_DIR), 0o755).await?;
    let profile_changed = ctx
        .host
        .write_file(&profile_path(instance), &render_profile(tmpdir), 0o644)
        .await?;

    if profile_changed {
        ctx.notify_immediate(APPARMOR_SERVICE).await?;
    }
    ctx.record_change(APPARMOR, dir_changed || profile_changed);
    Ok(())
}
