//! tmpfs temporary directory

use super::TMPDIR;
use crate::config::TmpDirConfig;
use crate::converge::RunContext;
use crate::error::Result;
use crate::host::MountSpec;

/// The tmpfs mount for the configured directory
pub fn mount_spec(config: &TmpDirConfig) -> MountSpec {
    MountSpec {
        mount_point: config.path.clone(),
        device: "tmpfs".to_string(),
        fstype: "tmpfs".to_string(),
        options: format!("rw,mode=1777,nr_inodes=10k,size={}", config.size),
        pass: 0,
    }
}

pub(super) async fn mount(ctx: &mut RunContext<'_>, config: &TmpDirConfig) -> Result<()> {
    // tmpfs root carries the same mode once mounted
    let created = ctx.host.create_dir(&config.path, 0o1777).await?;
    let mounted = ctx.host.mount(&mount_spec(config)).await?;
    ctx.record_change(TMPDIR, created || mounted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mount_options_carry_size() {
        let config = TmpDirConfig {
            enabled: true,
            size: "512M".into(),
            ..Default::default()
        };
        let spec = mount_spec(&config);

        assert_eq!(spec.mount_point, PathBuf::from("/var/mysqltmp"));
        assert_eq!(spec.fstype, "tmpfs");
        assert_eq!(spec.options, "rw,mode=1777,nr_inodes=10k,size=512M");
    }
}
