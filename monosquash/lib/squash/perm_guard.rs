use std::{
    collections::HashMap,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use getset::Getters;

use crate::{utils, SquashResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Tracks temporary permission changes made while merging layer trees.
///
/// Extracted layers keep the modes recorded in their archives, so a directory may be read-only
/// or unreadable to the user running the merge. The guard opens such paths up for the duration
/// of the merge and restores the recorded modes, newest first, when dropped.
#[derive(Debug, Default, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PermissionGuard {
    /// Maps paths to their original modes.
    original_modes: HashMap<PathBuf, u32>,

    /// Paths in the order they were modified.
    modified_paths: Vec<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PermissionGuard {
    /// Creates a guard that tracks nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds owner write and execute bits to `path` until the guard is dropped.
    ///
    /// Symlinks and missing paths are left alone.
    pub fn make_writable(&mut self, path: impl AsRef<Path>) -> SquashResult<()> {
        self.widen(path.as_ref(), 0o300)
    }

    /// Adds owner read, write and execute bits to `path` until the guard is dropped.
    pub fn make_readable_writable(&mut self, path: impl AsRef<Path>) -> SquashResult<()> {
        self.widen(path.as_ref(), 0o700)
    }

    /// Returns the mode `path` had before the guard touched it, if it did.
    pub fn original_mode(&self, path: &Path) -> Option<u32> {
        self.original_modes.get(path).copied()
    }

    fn widen(&mut self, path: &Path, bits: u32) -> SquashResult<()> {
        if self.original_modes.contains_key(path) {
            return Ok(());
        }

        let Ok(metadata) = fs::symlink_metadata(path) else {
            return Ok(());
        };

        if metadata.file_type().is_symlink() {
            return Ok(());
        }

        let mode = metadata.permissions().mode();
        if mode & bits == bits {
            return Ok(());
        }

        self.original_modes.insert(path.to_path_buf(), mode);
        self.modified_paths.push(path.to_path_buf());

        let widened = mode | bits;
        fs::set_permissions(path, fs::Permissions::from_mode(widened))?;
        tracing::trace!(
            "widened {}: {} -> {} ({:#o} -> {:#o})",
            path.display(),
            utils::format_mode(mode),
            utils::format_mode(widened),
            mode,
            widened
        );

        Ok(())
    }

    /// Restores original modes in reverse order of modification.
    fn restore_all(&mut self) -> SquashResult<()> {
        while let Some(path) = self.modified_paths.pop() {
            let Some(original_mode) = self.original_modes.remove(&path) else {
                continue;
            };

            match fs::symlink_metadata(&path) {
                Ok(metadata) if !metadata.file_type().is_symlink() => {}
                _ => {
                    tracing::trace!("not restoring vanished path {}", path.display());
                    continue;
                }
            }

            if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(original_mode)) {
                tracing::warn!("failed to restore mode of {}: {}", path.display(), e);
                return Err(e.into());
            }
        }

        self.original_modes.clear();
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for PermissionGuard {
    fn drop(&mut self) {
        if !self.modified_paths.is_empty() {
            if let Err(e) = self.restore_all() {
                tracing::debug!("error restoring permissions on drop: {}", e);
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_guard_restores_on_drop() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("locked");
        fs::create_dir(&dir)?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o500))?;

        {
            let mut guard = PermissionGuard::new();
            guard.make_writable(&dir)?;
            assert_eq!(guard.original_mode(&dir).map(|m| m & 0o777), Some(0o500));
            assert_eq!(fs::metadata(&dir)?.permissions().mode() & 0o777, 0o700);
            fs::write(dir.join("file"), "written")?;
        }

        assert_eq!(fs::metadata(&dir)?.permissions().mode() & 0o777, 0o500);
        assert!(dir.join("file").exists());

        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        Ok(())
    }

    #[test]
    fn test_permission_guard_skips_already_open_paths() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("open");
        fs::create_dir(&dir)?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755))?;

        let mut guard = PermissionGuard::new();
        guard.make_readable_writable(&dir)?;
        assert!(guard.get_modified_paths().is_empty());

        Ok(())
    }
}
