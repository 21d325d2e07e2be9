use std::{
    collections::HashMap,
    fs::{self, File, Metadata},
    io::{self, BufWriter, Write},
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};

use nix::sys::stat;
use tar::{Builder, EntryType, Header, HeaderMode};
use walkdir::WalkDir;

use crate::{utils::PAX_XATTR_PREFIX, SquashError, SquashResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Packs the tree under `src_dir` into a tar archive at `archive_path` and returns its size.
///
/// The archive is deterministic for a given tree:
/// - entries appear in sorted path order, named relative to `src_dir`
/// - headers carry mode, ownership and mtime
/// - symlinks are stored as links, never followed
/// - FIFOs and device nodes are stored as special entries
/// - files sharing an inode are stored once, later names as hard link entries
/// - extended attributes are stored as `SCHILY.xattr.*` PAX records
pub fn pack(src_dir: impl AsRef<Path>, archive_path: impl AsRef<Path>) -> SquashResult<u64> {
    let src_dir = src_dir.as_ref();
    let archive_path = archive_path.as_ref();

    let file = File::create(archive_path)?;
    let mut builder = Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);
    builder.mode(HeaderMode::Complete);

    let mut inodes: HashMap<(u64, u64), PathBuf> = HashMap::new();
    let mut count = 0usize;
    for entry in WalkDir::new(src_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| SquashError::archive(src_dir, e))?;
        let path = entry.path();
        let name = path.strip_prefix(src_dir).map_err(SquashError::custom)?;
        let metadata = fs::symlink_metadata(path)?;

        if metadata.file_type().is_socket() {
            tracing::warn!("skipping socket {}", path.display());
            continue;
        }

        if metadata.is_file() && metadata.nlink() > 1 {
            let key = (metadata.dev(), metadata.ino());
            if let Some(target) = inodes.get(&key) {
                append_hard_link(&mut builder, &metadata, name, target)
                    .map_err(|e| SquashError::archive(path, e))?;
                count += 1;
                continue;
            }
            inodes.insert(key, name.to_path_buf());
        }

        let xattrs = xattr_records(path);
        if !xattrs.is_empty() {
            builder
                .append_pax_extensions(xattrs.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
                .map_err(|e| SquashError::archive(path, e))?;
        }

        let file_type = metadata.file_type();
        let appended = if file_type.is_fifo()
            || file_type.is_char_device()
            || file_type.is_block_device()
        {
            append_special(&mut builder, &metadata, name)
        } else {
            builder.append_path_with_name(path, name)
        };
        appended.map_err(|e| SquashError::archive(path, e))?;
        count += 1;
    }

    let mut writer = builder
        .into_inner()
        .map_err(|e| SquashError::archive(archive_path, e))?;
    writer.flush()?;
    drop(writer);

    let size = fs::metadata(archive_path)?.len();
    tracing::debug!(
        "packed {count} entries from {} into {} ({size} bytes)",
        src_dir.display(),
        archive_path.display()
    );

    Ok(size)
}

fn append_hard_link(
    builder: &mut Builder<impl Write>,
    metadata: &Metadata,
    name: &Path,
    target: &Path,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);
    header.set_entry_type(EntryType::Link);
    header.set_size(0);
    builder.append_link(&mut header, name, target)
}

/// Appends a FIFO or device node under `name`, with its device numbers in the header.
fn append_special(
    builder: &mut Builder<impl Write>,
    metadata: &Metadata,
    name: &Path,
) -> io::Result<()> {
    let file_type = metadata.file_type();
    let entry_type = if file_type.is_fifo() {
        EntryType::Fifo
    } else if file_type.is_char_device() {
        EntryType::Char
    } else {
        EntryType::Block
    };

    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);
    header.set_entry_type(entry_type);
    header.set_size(0);

    let rdev = metadata.rdev();
    header.set_device_major(stat::major(rdev) as u32)?;
    header.set_device_minor(stat::minor(rdev) as u32)?;

    builder.append_data(&mut header, name, io::empty())
}

/// Reads the extended attributes of `path` as PAX records. Filesystems without xattr support
/// yield none.
fn xattr_records(path: &Path) -> Vec<(String, Vec<u8>)> {
    let names = match xattr::list(path) {
        Ok(names) => names,
        Err(e) => {
            tracing::debug!("cannot list xattrs of {}: {e}", path.display());
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for name in names {
        let Some(key) = name.to_str() else {
            tracing::warn!("skipping non-utf8 xattr {:?} on {}", name, path.display());
            continue;
        };

        match xattr::get(path, &name) {
            Ok(Some(value)) => records.push((format!("{PAX_XATTR_PREFIX}{key}"), value)),
            Ok(None) => {}
            Err(e) => tracing::debug!("cannot read xattr {key} of {}: {e}", path.display()),
        }
    }

    records
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
