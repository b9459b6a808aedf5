// Handles daemontools supervision (`svstat`/`svc`) and the run scripts it starts.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;
use std::process::Command;

const EXEC_BITS: u32 = 0o111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
}

/// Talks to the supervisor of a `/service/<name>` link.
pub trait Supervisor {
    fn is_running(&self, link: &Path) -> Result<bool>;
    fn control(&self, link: &Path, action: ServiceAction) -> Result<()>;
}

/// The real supervisor, driven through the daemontools command line tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct Svc;

impl Supervisor for Svc {
    fn is_running(&self, link: &Path) -> Result<bool> {
        let output = Command::new("svstat")
            .arg(link)
            .output()
            .context("Failed to execute svstat")?;

        Ok(svstat_reports_up(&String::from_utf8_lossy(&output.stdout)))
    }

    fn control(&self, link: &Path, action: ServiceAction) -> Result<()> {
        let flag = match action {
            ServiceAction::Start => "-u",
            ServiceAction::Stop => "-d",
        };

        let status = Command::new("svc")
            .arg(flag)
            .arg(link)
            .status()
            .with_context(|| format!("Failed to execute svc {} {}", flag, link.display()))?;

        if status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "svc {} {} exited with {}",
                flag,
                link.display(),
                status
            ))
        }
    }
}

/// `svstat` prints e.g. `/service/x: up (pid 123) 40 seconds`.
/// A stopped one reads `/service/x: down 3 seconds, normally up`.
pub fn svstat_reports_up(stdout: &str) -> bool {
    stdout.contains(": up")
}

/// True when the link exists and resolves to a directory.
pub fn is_supervised(link: &Path) -> bool {
    let is_link = fs::symlink_metadata(link)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    is_link && link.is_dir()
}

/// Removes the supervision link. Returns whether anything was removed.
pub fn unsupervise(link: &Path) -> Result<bool> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(link)
                .with_context(|| format!("Failed to remove {}", link.display()))?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Links `source_dir` into the scan directory unless a link is already there.
pub fn supervise(source_dir: &Path, link: &Path) -> Result<bool> {
    if !source_dir.is_dir() {
        return Ok(false);
    }
    if fs::symlink_metadata(link).is_ok_and(|m| m.file_type().is_symlink()) {
        return Ok(false);
    }

    symlink(source_dir, link).with_context(|| {
        format!(
            "Failed to link {} -> {}",
            link.display(),
            source_dir.display()
        )
    })?;
    Ok(true)
}

/// Only regular files are treated as run scripts.
pub fn is_run_script(path: &Path) -> bool {
    path.is_file()
}

/// The user/group/other execute bits of `path`.
pub fn exec_bits(path: &Path) -> Result<u32> {
    let meta =
        fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    Ok(meta.permissions().mode() & EXEC_BITS)
}

/// Matches `access(X_OK)` for root: any execute bit will do.
pub fn is_executable(path: &Path) -> Result<bool> {
    Ok(exec_bits(path)? != 0)
}

/// Replaces the execute bits with `bits`, leaving the rest of the mode
/// alone. Returns whether the mode actually changed.
pub fn set_exec_bits(path: &Path, bits: u32) -> Result<bool> {
    let meta =
        fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    let mode = meta.permissions().mode();
    let wanted = (mode & !EXEC_BITS) | (bits & EXEC_BITS);

    if wanted == mode {
        return Ok(false);
    }

    fs::set_permissions(path, fs::Permissions::from_mode(wanted))
        .with_context(|| format!("Failed to chmod {:o} {}", wanted & 0o7777, path.display()))?;
    Ok(true)
}
