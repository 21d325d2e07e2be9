use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, Read},
    os::unix::fs::PermissionsExt,
    path::{Component, Path, PathBuf},
};

use flate2::read::GzDecoder;
use nix::{
    sys::{
        stat::{self, Mode, SFlag},
        time::TimeVal,
    },
    unistd::{self, Gid, Uid},
};
use tar::{Archive, Entry, EntryType};

use crate::{utils::PAX_XATTR_PREFIX, SquashError, SquashResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts a layer archive into `dest_dir` and returns the number of entries unpacked.
///
/// A zero-length archive is an empty diff: `dest_dir` is created and left empty. Existing files
/// in `dest_dir` are overwritten.
///
/// # Errors
/// Returns [`SquashError::Archive`] carrying the underlying error text if the archive cannot be
/// opened or unpacked.
pub fn extract(archive_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> SquashResult<u64> {
    let archive_path = archive_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    fs::create_dir_all(dest_dir)?;

    let file = File::open(archive_path).map_err(|e| SquashError::archive(archive_path, e))?;
    let len = file
        .metadata()
        .map_err(|e| SquashError::archive(archive_path, e))?
        .len();

    if len == 0 {
        tracing::debug!("{} is empty, nothing to extract", archive_path.display());
        return Ok(0);
    }

    let count = unpack(file, dest_dir).map_err(|e| SquashError::archive(archive_path, e))?;
    tracing::debug!(
        "extracted {count} entries from {} into {}",
        archive_path.display(),
        dest_dir.display()
    );

    Ok(count)
}

/// Unpacks a plain or gzip-compressed tar stream into `dest_dir`.
///
/// This is how the outer export archive is read, which may arrive on standard input.
pub fn extract_stream(reader: impl Read, dest_dir: impl AsRef<Path>) -> SquashResult<u64> {
    let dest_dir = dest_dir.as_ref();
    fs::create_dir_all(dest_dir)?;

    unpack(reader, dest_dir).map_err(|e| SquashError::archive(dest_dir, e))
}

fn unpack(reader: impl Read, dest_dir: &Path) -> io::Result<u64> {
    let is_root = unistd::geteuid().is_root();

    let mut archive = Archive::new(decompressed(reader)?);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(true);
    archive.set_preserve_ownerships(is_root);

    let mut count = 0;
    let mut directories = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        count += 1;

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            // Applied last so their modes and mtimes survive their children.
            directories.push(entry);
        } else if kind.is_fifo() || kind.is_character_special() || kind.is_block_special() {
            unpack_special(&mut entry, dest_dir, is_root)?;
        } else {
            entry.unpack_in(dest_dir)?;
        }
    }

    directories.sort_by(|a, b| b.path_bytes().cmp(&a.path_bytes()));
    for mut dir in directories {
        if !dir.unpack_in(dest_dir)? {
            continue;
        }

        let Some(target) = target_path(dest_dir, &dir.path()?) else {
            continue;
        };
        let mtime = dir.header().mtime()?;
        unpack_xattrs(&mut dir, &target)?;
        set_mtime(&target, mtime)?;
    }

    Ok(count)
}

/// Creates a FIFO or device node entry, which `tar` would otherwise unpack as a regular file.
fn unpack_special<R: Read>(
    entry: &mut Entry<'_, R>,
    dest_dir: &Path,
    is_root: bool,
) -> io::Result<()> {
    let entry_path = entry.path()?.into_owned();
    let Some(target) = target_path(dest_dir, &entry_path) else {
        tracing::warn!("skipping {} outside the layer root", entry_path.display());
        return Ok(());
    };

    let header = entry.header();
    let mode = header.mode()? & 0o7777;
    let owner = if is_root {
        Some((header.uid()?, header.gid()?))
    } else {
        None
    };
    let mtime = header.mtime()?;
    let (kind, device) = match header.entry_type() {
        EntryType::Fifo => (SFlag::S_IFIFO, 0),
        kind => {
            let major = header.device_major()?.unwrap_or(0);
            let minor = header.device_minor()?.unwrap_or(0);
            let flag = if kind.is_character_special() {
                SFlag::S_IFCHR
            } else {
                SFlag::S_IFBLK
            };
            (flag, stat::makedev(major.into(), minor.into()))
        }
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
        if !fs::canonicalize(parent)?.starts_with(fs::canonicalize(dest_dir)?) {
            tracing::warn!("skipping {} outside the layer root", entry_path.display());
            return Ok(());
        }
    }

    match fs::symlink_metadata(&target) {
        Ok(metadata) if !metadata.is_dir() => fs::remove_file(&target)?,
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    stat::mknod(&target, kind, Mode::from_bits_truncate(mode as _), device)?;
    if let Some((uid, gid)) = owner {
        unistd::chown(
            &target,
            Some(Uid::from_raw(uid as u32)),
            Some(Gid::from_raw(gid as u32)),
        )?;
    }
    fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
    unpack_xattrs(entry, &target)?;
    set_mtime(&target, mtime)?;

    tracing::trace!("created special file {}", target.display());
    Ok(())
}

/// Applies the `SCHILY.xattr.*` PAX records of `entry` to `path`. Attributes the filesystem
/// refuses are skipped.
fn unpack_xattrs<R: Read>(entry: &mut Entry<'_, R>, path: &Path) -> io::Result<()> {
    let Some(extensions) = entry.pax_extensions()? else {
        return Ok(());
    };

    for extension in extensions {
        let extension = extension?;
        let Some(name) = extension
            .key()
            .ok()
            .and_then(|key| key.strip_prefix(PAX_XATTR_PREFIX))
        else {
            continue;
        };

        if let Err(e) = xattr::set(path, name, extension.value_bytes()) {
            tracing::debug!("cannot set xattr {name} on {}: {e}", path.display());
        }
    }

    Ok(())
}

fn set_mtime(path: &Path, mtime: u64) -> io::Result<()> {
    let time = TimeVal::new(mtime as _, 0);
    stat::lutimes(path, &time, &time)?;
    Ok(())
}

/// Resolves an entry path under `dest_dir`, dropping root and `.` components. Paths that climb
/// out with `..` resolve to nothing.
fn target_path(dest_dir: &Path, entry_path: &Path) -> Option<PathBuf> {
    let mut target = dest_dir.to_path_buf();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::ParentDir => return None,
            _ => {}
        }
    }

    (target != dest_dir).then_some(target)
}

/// Wraps `reader` in a gzip decoder when the stream starts with the gzip magic bytes.
fn decompressed<'a>(reader: impl Read + 'a) -> io::Result<Box<dyn Read + 'a>> {
    let mut reader = BufReader::new(reader);
    if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        tracing::debug!("layer archive is gzip compressed");
        return Ok(Box::new(GzDecoder::new(reader)));
    }

    Ok(Box::new(reader))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
