//! Preflight checks before a flashing session.
//!
//! Validates that the vendor tool bundle is usable and that no other
//! orchestrator on this host owns the bus. Failing here is cheap; failing
//! halfway through a board's bootstrap is not.
//!
//! # Example
//!
//! ```rust,no_run
//! use aml_flasher::preflight::{check_tool_dir, resolve_tool_dir, REQUIRED_TOOLS};
//!
//! let dir = resolve_tool_dir(None).expect("tool dir");
//! if let Err(e) = check_tool_dir(&dir, REQUIRED_TOOLS) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::executor::{PACKER_TOOL, UPDATE_TOOL};

/// Overrides the configured tool directory.
pub const TOOL_DIR_ENV: &str = "AML_TOOL_DIR";

/// Executables the session cannot run without.
///
/// Each tuple is (file name, what it is for).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    (UPDATE_TOOL, "bus scan and device commands"),
    (PACKER_TOOL, "image unpacking"),
];

/// Locate the vendor tool directory.
///
/// Order: `AML_TOOL_DIR`, then the configured directory, then the directory
/// of `update` on `PATH`.
pub fn resolve_tool_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(TOOL_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }
    let update = which::which(UPDATE_TOOL).map_err(|_| {
        anyhow!(
            "no vendor tool directory: set {} or [tools] dir, or put '{}' on PATH",
            TOOL_DIR_ENV,
            UPDATE_TOOL
        )
    })?;
    update
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("'{}' has no parent directory", update.display()))
}

/// Check if `path` is a file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Check that every tool is present and executable in `dir`.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` listing every missing tool, not just the first
pub fn check_tool_dir(dir: &Path, tools: &[(&str, &str)]) -> Result<()> {
    if !dir.is_dir() {
        bail!("Vendor tool directory '{}' doesn't exist", dir.display());
    }

    let missing = tools
        .iter()
        .filter(|(tool, _)| !is_executable(&dir.join(tool)))
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, why)| format!("  {} ({})", t, why))
            .collect::<Vec<_>>()
            .join("\n");
        bail!(
            "Missing vendor tools in '{}':\n{}",
            dir.display(),
            msg
        );
    }

    Ok(())
}

/// Held for the whole session; released when dropped.
#[derive(Debug)]
pub struct HostLock {
    _file: File,
    path: PathBuf,
}

impl HostLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `<work_dir>.lock`, next to the unpack directory.
pub fn host_lock_path(work_dir: &Path) -> PathBuf {
    let mut name = work_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "aml-flasher".into());
    name.push(".lock");
    work_dir.with_file_name(name)
}

/// Take the host-wide exclusive lock, failing fast if another orchestrator
/// holds it.
pub fn acquire_host_lock(path: &Path) -> Result<HostLock> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating lock directory '{}'", parent.display()))?;
    }

    // The file is never unlinked: removing a locked file would let a second
    // process lock a fresh inode at the same path.
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("creating lock file '{}'", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        bail!(
            "another aml-flasher session holds '{}'",
            path.display()
        );
    }

    Ok(HostLock {
        _file: file,
        path: path.to_path_buf(),
    })
}
