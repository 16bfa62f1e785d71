//! Filesystem helpers
//!
//! Directory and file creation with explicit modes, private secret files,
//! rename with a cross-filesystem fallback, and idempotent directory copies.

use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

use crate::module::traits::ModuleError;

/// Default mode for directories the engine creates
pub const DIR_MODE: u32 = 0o755;
/// Default mode for regular files the engine writes
pub const FILE_MODE: u32 = 0o644;
/// Mode for directories holding secrets
pub const SECRET_DIR_MODE: u32 = 0o700;
/// Mode for secret files
pub const SECRET_FILE_MODE: u32 = 0o600;

/// Outcome of a rename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameKind {
    /// Same-filesystem rename
    Atomic,
    /// Copy + fsync + remove fallback
    CopiedAcrossDevices,
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Create a directory (and parents) and set its mode
pub fn ensure_dir(path: &Path, mode: u32) -> Result<(), ModuleError> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| ModuleError::io(path, "Failed to create directory", e))?;
        debug!("Created directory {:?}", path);
    }
    set_mode(path, mode).map_err(|e| ModuleError::io(path, "Failed to set directory mode", e))
}

/// Write a file and set its mode, creating the parent directory if needed
pub fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), ModuleError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            ensure_dir(parent, DIR_MODE)?;
        }
    }
    let mut file =
        fs::File::create(path).map_err(|e| ModuleError::io(path, "Failed to create file", e))?;
    file.write_all(contents)
        .map_err(|e| ModuleError::io(path, "Failed to write file", e))?;
    file.sync_all()
        .map_err(|e| ModuleError::io(path, "Failed to sync file", e))?;
    set_mode(path, mode).map_err(|e| ModuleError::io(path, "Failed to set file mode", e))
}

/// Create a secret file that is private from the first byte
///
/// Fails if `path` already exists; secrets are never overwritten.
pub fn write_secret_file(path: &Path, contents: &[u8]) -> Result<(), ModuleError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(SECRET_FILE_MODE);
    }
    let mut file = options
        .open(path)
        .map_err(|e| ModuleError::io(path, "Failed to create secret file", e))?;
    file.write_all(contents)
        .map_err(|e| ModuleError::io(path, "Failed to write secret file", e))?;
    file.sync_all()
        .map_err(|e| ModuleError::io(path, "Failed to sync secret file", e))
}

/// Copy `from` to a new file `to` and fsync it
///
/// Hard-links when possible; `from` is left untouched either way.
pub fn copy_file(from: &Path, to: &Path, mode: u32) -> Result<(), ModuleError> {
    if fs::hard_link(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| ModuleError::io(to, "Failed to copy", e))?;
    fs::File::open(to)
        .and_then(|f| f.sync_all())
        .map_err(|e| ModuleError::io(to, "Failed to sync", e))?;
    set_mode(to, mode).map_err(|e| ModuleError::io(to, "Failed to set file mode", e))
}

#[cfg(unix)]
fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &std::io::Error) -> bool {
    false
}

/// Rename `from` to `to`
///
/// Uses a same-filesystem rename. When the two paths live on different
/// filesystems, falls back to copy, fsync, remove, and logs the move as
/// non-atomic.
pub fn rename(from: &Path, to: &Path) -> Result<RenameKind, ModuleError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(RenameKind::Atomic),
        Err(e) if is_cross_device(&e) => {
            warn!(
                "Non-atomic move of {:?} to {:?}: paths are on different filesystems",
                from, to
            );
            fs::copy(from, to).map_err(|e| ModuleError::io(to, "Failed to copy", e))?;
            fs::File::open(to)
                .and_then(|f| f.sync_all())
                .map_err(|e| ModuleError::io(to, "Failed to sync", e))?;
            fs::remove_file(from).map_err(|e| ModuleError::io(from, "Failed to remove", e))?;
            Ok(RenameKind::CopiedAcrossDevices)
        }
        Err(e) => Err(ModuleError::io(from, "Failed to rename", e)),
    }
}

/// Recursively copy `from` into `to`, never overwriting existing files
///
/// Returns the list of files that were newly created.
pub fn copy_dir_no_overwrite(
    from: &Path,
    to: &Path,
) -> Result<Vec<std::path::PathBuf>, ModuleError> {
    let mut created = Vec::new();
    if !from.is_dir() {
        return Ok(created);
    }
    ensure_dir(to, DIR_MODE)?;

    let entries =
        fs::read_dir(from).map_err(|e| ModuleError::io(from, "Failed to read directory", e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ModuleError::io(from, "Failed to read entry", e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| ModuleError::io(&source, "Failed to stat", e))?;

        if file_type.is_dir() {
            created.extend(copy_dir_no_overwrite(&source, &target)?);
        } else if file_type.is_file() {
            if target.exists() {
                continue;
            }
            fs::copy(&source, &target).map_err(|e| ModuleError::io(&target, "Failed to copy", e))?;
            set_mode(&target, FILE_MODE)
                .map_err(|e| ModuleError::io(&target, "Failed to set file mode", e))?;
            created.push(target);
        }
    }
    Ok(created)
}

/// Remove a directory tree if it exists, then recreate it empty
pub fn recreate_dir(path: &Path, mode: u32) -> Result<(), ModuleError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| ModuleError::io(path, "Failed to clear", e))?;
    }
    ensure_dir(path, mode)
}
