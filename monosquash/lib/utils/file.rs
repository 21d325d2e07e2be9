use std::{fs, io, os::unix::fs::PermissionsExt, path::Path};

use crate::SquashResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Removes a file or directory tree, ignoring paths that do not exist.
///
/// Directories are made accessible to the owner first so trees extracted with restrictive
/// modes such as `0o000` can still be removed.
pub fn remove_tree(path: impl AsRef<Path>) -> SquashResult<()> {
    let path = path.as_ref();
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_dir() {
        fs::remove_file(path)?;
        return Ok(());
    }

    relax_tree(path)?;
    fs::remove_dir_all(path)?;
    Ok(())
}

fn relax_tree(dir: &Path) -> io::Result<()> {
    relax_dir(dir)?;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            relax_tree(&entry.path())?;
        }
    }

    Ok(())
}

fn relax_dir(path: &Path) -> io::Result<()> {
    let mode = fs::symlink_metadata(path)?.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))?;
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_tree_with_locked_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().join("tree");
        let locked = root.join("a/locked");
        fs::create_dir_all(&locked)?;
        fs::write(locked.join("file"), "content")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;
        fs::set_permissions(root.join("a"), fs::Permissions::from_mode(0o500))?;

        remove_tree(&root)?;
        assert!(!root.exists());

        // Removing again is not an error.
        remove_tree(&root)?;
        Ok(())
    }
}
