// Temporarily makes the read-only root filesystem writable.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub trait Mounter {
    fn is_read_only(&self, mountpoint: &Path) -> Result<bool>;
    fn remount(&self, mountpoint: &Path, writable: bool) -> Result<()>;
}

/// Uses `/proc/mounts` and `mount -o remount,...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMount;

impl Mounter for SystemMount {
    fn is_read_only(&self, mountpoint: &Path) -> Result<bool> {
        let table = fs::read_to_string("/proc/mounts").context("Failed to read /proc/mounts")?;
        mount_is_read_only(&table, mountpoint)
            .with_context(|| format!("{} is not a mount point", mountpoint.display()))
    }

    fn remount(&self, mountpoint: &Path, writable: bool) -> Result<()> {
        let opts = if writable { "remount,rw" } else { "remount,ro" };

        let output = Command::new("mount")
            .arg("-o")
            .arg(opts)
            .arg(mountpoint)
            .output()
            .context("Failed to execute mount")?;

        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "mount -o {} {} failed: {}",
                opts,
                mountpoint.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

/// Looks `mountpoint` up in a `/proc/mounts` style table. The last entry
/// wins since later mounts stack on top of earlier ones.
pub fn mount_is_read_only(table: &str, mountpoint: &Path) -> Option<bool> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let target = fields.next()?;
            let _fstype = fields.next()?;
            let options = fields.next()?;
            (Path::new(target) == mountpoint).then_some(options)
        })
        .last()
        .map(|options| options.split(',').any(|o| o == "ro"))
}

/// Holds the filesystem writable until dropped. Only undoes what it did:
/// a root that was already read-write is left that way.
pub struct RemountGuard<'a> {
    mounter: &'a dyn Mounter,
    mountpoint: PathBuf,
    remounted: bool,
    failed: bool,
}

impl<'a> RemountGuard<'a> {
    /// Never fails; a root that cannot be made writable is logged and the
    /// caller carries on with whatever the filesystem allows.
    pub fn acquire(mounter: &'a dyn Mounter, mountpoint: &Path) -> Self {
        let mut guard = Self {
            mounter,
            mountpoint: mountpoint.to_path_buf(),
            remounted: false,
            failed: false,
        };

        match mounter.is_read_only(mountpoint) {
            Ok(false) => {}
            Ok(true) => match mounter.remount(mountpoint, true) {
                Ok(()) => {
                    log::info!("Remounted {} read-write", mountpoint.display());
                    guard.remounted = true;
                }
                Err(e) => {
                    log::warn!("Could not remount {} read-write: {:#}", mountpoint.display(), e);
                    guard.failed = true;
                }
            },
            Err(e) => {
                log::warn!("Could not determine mount mode of {}: {:#}", mountpoint.display(), e);
                guard.failed = true;
            }
        }

        guard
    }

    #[cfg(test)]
    fn remounted(&self) -> bool {
        self.remounted
    }

    /// True when the filesystem could not be made writable.
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl Drop for RemountGuard<'_> {
    fn drop(&mut self) {
        if !self.remounted {
            return;
        }
        match self.mounter.remount(&self.mountpoint, false) {
            Ok(()) => log::info!("Remounted {} read-only", self.mountpoint.display()),
            Err(e) => log::warn!(
                "Could not remount {} read-only: {:#}",
                self.mountpoint.display(),
                e
            ),
        }
    }
}
