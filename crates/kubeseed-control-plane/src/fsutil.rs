//! Owner-only, atomic file writes.
//!
//! Readers of the data directory must never observe a partially written or
//! world-readable secret. Every write goes to a temporary file in the target
//! directory, which is created with mode 0600, and is then renamed into place.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::Builder;

use crate::error::{DepsError, Result};

/// Permission bits applied to every generated file.
pub const OWNER_ONLY: u32 = 0o600;

/// Permission bits applied to generated directories.
pub const OWNER_ONLY_DIR: u32 = 0o700;

/// True when every path exists.
pub fn exists<P: AsRef<Path>>(paths: &[P]) -> bool {
    paths.iter().all(|p| p.as_ref().exists())
}

/// True when the path exists and is non-empty.
pub fn has_content(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Create a directory and its parents, owner-only.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(OWNER_ONLY_DIR);
    }
    builder
        .create(dir)
        .map_err(|e| DepsError::io("create directory", dir, e))
}

/// Read a file, attaching the path to any error.
pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| DepsError::io("read", path, e))
}

/// Read a UTF-8 file, attaching the path to any error.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| DepsError::io("read", path, e))
}

/// Restrict a file to its owner.
pub fn set_owner_only(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(OWNER_ONLY))
            .map_err(|e| DepsError::io("set permissions on", path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Atomically replace `path` with `contents`, owner-only.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;

    // tempfile creates the file with 0600 on unix
    let mut tmp = Builder::new()
        .prefix(".kubeseed-")
        .tempfile_in(dir)
        .map_err(|e| DepsError::io("create temporary file in", dir, e))?;
    set_owner_only(tmp.path())?;
    tmp.write_all(contents)
        .map_err(|e| DepsError::io("write", tmp.path().to_path_buf(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| DepsError::io("sync", tmp.path().to_path_buf(), e))?;
    tmp.persist(path)
        .map_err(|e| DepsError::io("rename into place", path, e.error))?;
    Ok(())
}

/// Atomically write `contents` unless the file already holds exactly them.
///
/// Returns true when the file was written. Watchers of unchanged files see
/// no event.
pub fn write_if_changed(path: &Path, contents: &[u8]) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents {
            set_owner_only(path)?;
            return Ok(false);
        }
    }
    atomic_write(path, contents)?;
    Ok(true)
}

/// Remove a file, ignoring a missing one. Returns true when a file was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DepsError::io("remove", path, e)),
    }
}

/// Give `dst` the same underlying file as `src`.
///
/// Uses a hard link so both names refer to one inode. Where links are not
/// supported the bytes are copied and the source removed.
pub fn link_or_move(src: &Path, dst: &Path) -> Result<()> {
    if let Some(dir) = dst.parent() {
        ensure_dir(dir)?;
    }
    match fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::Unsupported => {
            let contents = read(src)?;
            atomic_write(dst, &contents)?;
            remove_if_exists(src)?;
            Ok(())
        }
        Err(e) => Err(DepsError::io("link", dst, e)),
    }
}
