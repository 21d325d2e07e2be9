use std::{
    collections::{BTreeMap, HashMap},
    ffi::{OsStr, OsString},
    fs::{self, DirBuilder, Metadata},
    io,
    os::unix::{
        ffi::OsStrExt,
        fs::{DirBuilderExt, FileTypeExt, MetadataExt, PermissionsExt},
    },
    path::{Path, PathBuf},
};

use nix::{
    sys::{
        stat::{self, Mode, SFlag},
        time::TimeVal,
    },
    unistd::{self, Gid, Uid},
};

use crate::{
    utils::{self, WHITEOUT_OPAQUE, WHITEOUT_PREFIX},
    SquashError, SquashResult,
};

use super::{LowerView, PermissionGuard};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Prefix of aufs bookkeeping entries such as `.wh..wh.plnk`, which are never applied.
const AUFS_META_PREFIX: &str = ".wh..wh.";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Applies extracted layer trees, oldest first, onto an accumulated tree.
///
/// Regular entries overwrite or create the same path. A `.wh.X` entry removes `X`, and a
/// `.wh..wh..opq` entry clears its directory before the layer's own entries of that directory
/// are applied. Markers are dropped unless the path they hide is still visible in `lower`.
///
/// Directory attributes are collected while merging and applied once every layer is in,
/// deepest first, so read-only directories and their mtimes come out as recorded.
pub struct LayerMerger<'a> {
    acc_root: &'a Path,
    lower: &'a LowerView,
    is_root: bool,
    dest_guard: PermissionGuard,
    dirs: BTreeMap<PathBuf, DirAttrs>,
    inodes: HashMap<(u64, u64), PathBuf>,
}

/// Attributes of a merged directory, applied after all layers.
#[derive(Debug, Clone)]
struct DirAttrs {
    mode: u32,
    uid: u32,
    gid: u32,
    atime: TimeVal,
    mtime: TimeVal,
    xattrs: Vec<(OsString, Vec<u8>)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a> LayerMerger<'a> {
    /// Creates a merger that accumulates into `acc_root`.
    pub fn new(acc_root: &'a Path, lower: &'a LowerView) -> Self {
        Self {
            acc_root,
            lower,
            is_root: unistd::geteuid().is_root(),
            dest_guard: PermissionGuard::new(),
            dirs: BTreeMap::new(),
            inodes: HashMap::new(),
        }
    }

    /// Applies one extracted layer tree.
    pub fn apply(&mut self, layer_root: &Path) -> SquashResult<()> {
        tracing::debug!(
            "applying {} onto {}",
            layer_root.display(),
            self.acc_root.display()
        );

        self.inodes.clear();
        let mut src_guard = PermissionGuard::new();
        self.apply_dir(layer_root, Path::new(""), &mut src_guard)
    }

    /// Restores touched permissions and applies the collected directory attributes.
    pub fn finish(mut self) -> SquashResult<()> {
        drop(std::mem::take(&mut self.dest_guard));

        for (rel, attrs) in self.dirs.iter().rev() {
            attrs.apply(&self.acc_root.join(rel), self.is_root)?;
        }

        Ok(())
    }

    fn apply_dir(
        &mut self,
        layer_root: &Path,
        rel: &Path,
        src_guard: &mut PermissionGuard,
    ) -> SquashResult<()> {
        let src_dir = layer_root.join(rel);
        let acc_dir = self.acc_root.join(rel);

        src_guard.make_readable_writable(&src_dir)?;
        self.dest_guard.make_writable(&acc_dir)?;

        let mut names = fs::read_dir(&src_dir)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();

        // Opaque first, then whiteouts, then the layer's own entries.
        if names.iter().any(|name| name == WHITEOUT_OPAQUE) {
            self.clear_dir(&acc_dir, rel)?;
            if self.lower.is_visible(rel) {
                self.place_marker(
                    &src_dir.join(WHITEOUT_OPAQUE),
                    &acc_dir.join(WHITEOUT_OPAQUE),
                    src_guard,
                )?;
            }
        }

        for name in &names {
            let Some(target) = whiteout_target(name) else {
                continue;
            };

            let target_rel = rel.join(target);
            self.remove_path(&acc_dir.join(target), &target_rel)?;

            if self.lower.is_visible(&target_rel) {
                tracing::debug!("keeping whiteout for {}", target_rel.display());
                self.place_marker(&src_dir.join(name), &acc_dir.join(name), src_guard)?;
            } else {
                tracing::trace!("dropping whiteout for {}", target_rel.display());
            }
        }

        for name in &names {
            if name.as_bytes().starts_with(WHITEOUT_PREFIX.as_bytes()) {
                continue;
            }

            self.apply_entry(layer_root, rel, name, src_guard)?;
        }

        Ok(())
    }

    fn apply_entry(
        &mut self,
        layer_root: &Path,
        rel: &Path,
        name: &OsStr,
        src_guard: &mut PermissionGuard,
    ) -> SquashResult<()> {
        let src = layer_root.join(rel).join(name);
        let acc_dir = self.acc_root.join(rel);
        let dst = acc_dir.join(name);
        let entry_rel = rel.join(name);
        let metadata = fs::symlink_metadata(&src)?;

        let mut marker = OsString::from(WHITEOUT_PREFIX);
        marker.push(name);
        let over_whiteout = remove_if_exists(&acc_dir.join(&marker))?;

        if metadata.is_dir() {
            match fs::symlink_metadata(&dst) {
                Ok(existing) if existing.is_dir() => self.dest_guard.make_writable(&dst)?,
                Ok(_) => {
                    fs::remove_file(&dst)?;
                    create_dir(&dst)?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => create_dir(&dst)?,
                Err(e) => return Err(e.into()),
            }

            // Lower content of a directory re-created over a kept whiteout must stay hidden.
            if over_whiteout && self.lower.is_visible(&entry_rel) {
                fs::write(dst.join(WHITEOUT_OPAQUE), b"")?;
            }

            self.dirs
                .insert(entry_rel.clone(), DirAttrs::capture(&src, &metadata));
            return self.apply_dir(layer_root, &entry_rel, src_guard);
        }

        match fs::symlink_metadata(&dst) {
            Ok(existing) if existing.is_dir() => {
                if fs::read_dir(&dst)?.next().is_some() {
                    return Err(SquashError::MergeConflict {
                        path: entry_rel,
                        reason: "a non-directory entry replaces a non-empty directory"
                            .to_string(),
                    });
                }

                fs::remove_dir(&dst)?;
                self.forget_dirs(&entry_rel, true);
            }
            Ok(_) => fs::remove_file(&dst)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.copy_entry(&src, &dst, &metadata, src_guard)
    }

    fn copy_entry(
        &mut self,
        src: &Path,
        dst: &Path,
        metadata: &Metadata,
        src_guard: &mut PermissionGuard,
    ) -> SquashResult<()> {
        let file_type = metadata.file_type();

        if file_type.is_file() {
            if metadata.nlink() > 1 {
                let key = (metadata.dev(), metadata.ino());
                if let Some(first) = self.inodes.get(&key) {
                    tracing::trace!("linking {} to {}", dst.display(), first.display());
                    fs::hard_link(first, dst)?;
                    return Ok(());
                }
                self.inodes.insert(key, dst.to_path_buf());
            }

            src_guard.make_readable_writable(src)?;
            fs::copy(src, dst)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(src)?, dst)?;
        } else if file_type.is_fifo() {
            unistd::mkfifo(dst, Mode::from_bits_truncate(metadata.mode() as _))?;
        } else if file_type.is_char_device() || file_type.is_block_device() {
            let kind = if file_type.is_char_device() {
                SFlag::S_IFCHR
            } else {
                SFlag::S_IFBLK
            };
            stat::mknod(
                dst,
                kind,
                Mode::from_bits_truncate(metadata.mode() as _),
                metadata.rdev() as _,
            )?;
        } else {
            tracing::warn!("skipping unsupported entry {}", src.display());
            return Ok(());
        }

        let mode = src_guard
            .original_mode(src)
            .unwrap_or_else(|| metadata.permissions().mode());
        self.apply_entry_attrs(src, dst, metadata, mode)
    }

    fn apply_entry_attrs(
        &self,
        src: &Path,
        dst: &Path,
        metadata: &Metadata,
        mode: u32,
    ) -> SquashResult<()> {
        if metadata.file_type().is_symlink() {
            if self.is_root {
                std::os::unix::fs::lchown(dst, Some(metadata.uid()), Some(metadata.gid()))?;
            }
        } else {
            if self.is_root {
                unistd::chown(
                    dst,
                    Some(Uid::from_raw(metadata.uid())),
                    Some(Gid::from_raw(metadata.gid())),
                )?;
            }

            fs::set_permissions(dst, fs::Permissions::from_mode(mode & 0o7777))?;
            for (name, value) in read_xattrs(src) {
                write_xattr(dst, &name, &value);
            }
        }

        stat::lutimes(dst, &atime_of(metadata), &mtime_of(metadata))?;
        Ok(())
    }

    /// Copies a whiteout marker into the accumulated tree, replacing any earlier one.
    fn place_marker(
        &mut self,
        src: &Path,
        dst: &Path,
        src_guard: &mut PermissionGuard,
    ) -> SquashResult<()> {
        remove_if_exists(dst)?;
        let metadata = fs::symlink_metadata(src)?;
        self.copy_entry(src, dst, &metadata, src_guard)
    }

    fn remove_path(&mut self, path: &Path, rel: &Path) -> SquashResult<()> {
        if fs::symlink_metadata(path).is_ok() {
            tracing::trace!("whiteout removes {}", rel.display());
            utils::remove_tree(path)?;
            self.forget_dirs(rel, true);
        }

        Ok(())
    }

    fn clear_dir(&mut self, acc_dir: &Path, rel: &Path) -> SquashResult<()> {
        if !acc_dir.is_dir() {
            return Ok(());
        }

        tracing::trace!("opaque directory {} cleared", rel.display());
        for entry in fs::read_dir(acc_dir)? {
            utils::remove_tree(entry?.path())?;
        }

        self.forget_dirs(rel, false);
        Ok(())
    }

    /// Drops collected attributes of directories under `rel`, and of `rel` itself if asked.
    fn forget_dirs(&mut self, rel: &Path, including_self: bool) {
        self.dirs
            .retain(|path, _| !path.starts_with(rel) || (!including_self && path == rel));
    }
}

impl DirAttrs {
    fn capture(src: &Path, metadata: &Metadata) -> Self {
        Self {
            mode: metadata.permissions().mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
            atime: atime_of(metadata),
            mtime: mtime_of(metadata),
            xattrs: read_xattrs(src),
        }
    }

    fn apply(&self, path: &Path, is_root: bool) -> SquashResult<()> {
        if is_root {
            unistd::chown(
                path,
                Some(Uid::from_raw(self.uid)),
                Some(Gid::from_raw(self.gid)),
            )?;
        }

        for (name, value) in &self.xattrs {
            write_xattr(path, name, value);
        }

        fs::set_permissions(path, fs::Permissions::from_mode(self.mode))?;
        stat::lutimes(path, &self.atime, &self.mtime)?;
        tracing::trace!(
            "applied {} ({:#o}) to {}",
            utils::format_mode(self.mode),
            self.mode,
            path.display()
        );

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Applies `layers`, oldest first, onto the tree at `acc_root`.
pub fn merge_layers(acc_root: &Path, layers: &[PathBuf], lower: &LowerView) -> SquashResult<()> {
    let mut merger = LayerMerger::new(acc_root, lower);
    for layer in layers {
        merger.apply(layer)?;
    }

    merger.finish()
}

/// Returns the name a whiteout entry hides, or `None` for entries that are not plain whiteouts.
fn whiteout_target(name: &OsStr) -> Option<&OsStr> {
    let bytes = name.as_bytes();
    if bytes.starts_with(AUFS_META_PREFIX.as_bytes()) {
        return None;
    }

    bytes
        .strip_prefix(WHITEOUT_PREFIX.as_bytes())
        .filter(|target| !target.is_empty())
        .map(OsStr::from_bytes)
}

fn create_dir(path: &Path) -> io::Result<()> {
    DirBuilder::new().mode(0o755).create(path)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn atime_of(metadata: &Metadata) -> TimeVal {
    TimeVal::new(metadata.atime() as _, (metadata.atime_nsec() / 1000) as _)
}

fn mtime_of(metadata: &Metadata) -> TimeVal {
    TimeVal::new(metadata.mtime() as _, (metadata.mtime_nsec() / 1000) as _)
}

fn read_xattrs(path: &Path) -> Vec<(OsString, Vec<u8>)> {
    let Ok(names) = xattr::list(path) else {
        return Vec::new();
    };

    names
        .filter_map(|name| match xattr::get(path, &name) {
            Ok(Some(value)) => Some((name, value)),
            _ => None,
        })
        .collect()
}

fn write_xattr(path: &Path, name: &OsStr, value: &[u8]) {
    if let Err(e) = xattr::set(path, name, value) {
        tracing::debug!(
            "cannot set xattr {:?} on {}: {}",
            name,
            path.display(),
            e
        );
    }
}
