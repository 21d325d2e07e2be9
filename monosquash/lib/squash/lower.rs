use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use crate::utils::{WHITEOUT_OPAQUE, WHITEOUT_PREFIX};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The extracted trees of the layers kept below a squashed layer, nearest first.
///
/// Answers whether a path is visible in the union of those layers, so the merge knows whether a
/// whiteout still has something to hide.
#[derive(Debug, Clone, Default)]
pub struct LowerView {
    trees: Vec<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
enum Probe {
    /// The layer provides the path.
    Found,

    /// The layer hides the path from everything below it.
    Hidden,

    /// The layer says nothing about the path.
    Absent,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LowerView {
    /// Creates a view over extracted layer trees ordered nearest first.
    pub fn new(trees: Vec<PathBuf>) -> Self {
        Self { trees }
    }

    /// Whether `rel`, relative to the layer root, is visible through the lower layers.
    ///
    /// The empty path is the root directory, which is visible whenever there is a layer.
    pub fn is_visible(&self, rel: &Path) -> bool {
        let components: Vec<&std::ffi::OsStr> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name),
                _ => None,
            })
            .collect();

        if components.is_empty() {
            return !self.trees.is_empty();
        }

        for tree in &self.trees {
            match probe(tree, &components) {
                Probe::Found => return true,
                Probe::Hidden => return false,
                Probe::Absent => continue,
            }
        }

        false
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn probe(tree: &Path, components: &[&std::ffi::OsStr]) -> Probe {
    let last = components.len() - 1;
    let mut current = tree.to_path_buf();
    let mut opaque_above = false;

    for (idx, name) in components.iter().enumerate() {
        let mut whiteout = std::ffi::OsString::from(WHITEOUT_PREFIX);
        whiteout.push(name);
        if fs::symlink_metadata(current.join(&whiteout)).is_ok() {
            return Probe::Hidden;
        }

        current.push(name);
        let metadata = match fs::symlink_metadata(&current) {
            Ok(metadata) => metadata,
            Err(_) if opaque_above => return Probe::Hidden,
            Err(_) => return Probe::Absent,
        };

        if idx == last {
            return Probe::Found;
        }

        if !metadata.is_dir() {
            return Probe::Hidden;
        }

        if fs::symlink_metadata(current.join(WHITEOUT_OPAQUE)).is_ok() {
            opaque_above = true;
        }
    }

    Probe::Absent
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Layers, nearest first:
    ///
    /// ```text
    /// upper/                  lower/
    /// ├── .wh.gone            ├── gone
    /// ├── etc/                ├── etc/
    /// │   └── .wh..wh..opq    │   └── passwd
    /// └── file                ├── usr/
    ///                         │   └── bin/sh
    ///                         └── file/   (shadowed by upper's file)
    ///                             └── inner
    /// ```
    fn test_lower_view_visibility() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let upper = temp.path().join("upper");
        let lower = temp.path().join("lower");

        fs::create_dir_all(upper.join("etc"))?;
        fs::write(upper.join(".wh.gone"), "")?;
        fs::write(upper.join("etc").join(WHITEOUT_OPAQUE), "")?;
        fs::write(upper.join("file"), "")?;

        fs::create_dir_all(lower.join("etc"))?;
        fs::create_dir_all(lower.join("usr/bin"))?;
        fs::create_dir_all(lower.join("file"))?;
        fs::write(lower.join("gone"), "")?;
        fs::write(lower.join("etc/passwd"), "")?;
        fs::write(lower.join("usr/bin/sh"), "")?;
        fs::write(lower.join("file/inner"), "")?;

        let view = LowerView::new(vec![upper, lower]);
        assert!(view.is_visible(Path::new("")));
        assert!(view.is_visible(Path::new("usr/bin/sh")));
        assert!(view.is_visible(Path::new("etc")));
        assert!(view.is_visible(Path::new("file")));
        assert!(!view.is_visible(Path::new("gone")));
        assert!(!view.is_visible(Path::new("etc/passwd")));
        assert!(!view.is_visible(Path::new("file/inner")));
        assert!(!view.is_visible(Path::new("missing")));

        assert!(!LowerView::default().is_visible(Path::new("")));
        Ok(())
    }
}
