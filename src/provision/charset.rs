//! Server character set

use super::CHARSET;
use crate::config::{CharsetConfig, InstanceOptions};
use crate::converge::RunContext;
use crate::error::Result;

/// Option file name in the include directory
pub const CHARSET_FILE: &str = "charset.cnf";

pub fn render_charset(config: &CharsetConfig) -> String {
    format!(
        "# Managed by myconverge\n\
         \n\
         [client]\n\
         default-character-set = {charset}\n\
         \n\
         [mysqld]\n\
         character-set-server = {charset}\n\
         collation-server = {collation}\n",
        charset = config.charset,
        collation = config.collation,
    )
}

pub(super) async fn apply(ctx: &mut RunContext<'_>, options: &InstanceOptions) -> Result<()> {
    let path = options.include_dir().join(CHARSET_FILE);
    let changed = ctx
        .host
        .write_file(&path, &render_charset(&ctx.config.charset), 0o644)
        .await?;

    if changed {
        ctx.notify_delayed(&options.service_name());
    }
    ctx.record_change(CHARSET, changed);
    Ok(())
}
