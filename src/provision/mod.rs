//! Provisioner
//!
//! Ensures a database instance exists with the requested port, credentials
//! and tuning. Every sub-step is idempotent; the host reports whether it
//! changed anything and the outcome ends up in the pass report.

mod apparmor;
mod charset;
mod credentials;
mod tmpdir;

pub use apparmor::{in_container, render_profile, APPARMOR_SERVICE, CONTAINER_MARKERS, PROFILE_DIR};
pub use charset::{render_charset, CHARSET_FILE};
pub use credentials::{CredentialFile, CREDENTIAL_FILE_MODE};
pub use tmpdir::mount_spec;

use crate::config::InstanceOptions;
use crate::converge::{RunContext, StepOutcome};
use crate::error::Result;
use crate::host::ServiceSpec;
use crate::tuning::build_tuning_set;

// Step names as they appear in the pass report
pub const TMPDIR: &str = "tmpdir";
pub const APPARMOR: &str = "apparmor";
pub const SERVICE: &str = "service";
pub const TUNING: &str = "tuning";
pub const CHARSET: &str = "charset";
pub const CREDENTIALS: &str = "credentials";

/// Provision an instance
pub async fn provision(ctx: &mut RunContext<'_>, options: &InstanceOptions) -> Result<()> {
    let config = ctx.config;
    let tuning = build_tuning_set(&config.tuning, ctx.tuned.as_ref());

    if config.tmpdir.enabled {
        tmpdir::mount(ctx, &config.tmpdir).await?;
    } else {
        ctx.record(TMPDIR, StepOutcome::skipped("tmpdir disabled"));
    }

    apparmor::configure(ctx, &options.name, &config.tmpdir.path).await?;

    let tmp_dir = config.tmpdir.enabled.then(|| config.tmpdir.path.clone());
    let spec = ServiceSpec::new(options, tmp_dir);
    let created = ctx.host.create_service(&spec).await?;
    let started = ctx.host.start_service(&spec.service_name()).await?;
    ctx.record_change(SERVICE, created || started);

    let include_dir = options.include_dir();
    ctx.host.create_dir(&include_dir, 0o755).await?;

    let mut changed = false;
    for (file, content) in tuning.render() {
        changed |= ctx
            .host
            .write_file(&include_dir.join(&file), &content, 0o644)
            .await?;
    }
    if changed {
        ctx.notify_delayed(&options.service_name());
    }
    ctx.record_change(TUNING, changed);

    charset::apply(ctx, options).await?;
    credentials::apply(ctx, options).await?;

    Ok(())
}
