use std::path::PathBuf;

use typed_builder::TypedBuilder;

use crate::{
    config::{RepoTag, StartPoint},
    utils::MONOSQUASH_TMPDIR_ENV_VAR,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Options for a single squash run.
///
/// ## Examples
///
/// ```
/// use monosquash::config::{SquashOptions, StartPoint};
///
/// let options = SquashOptions::builder()
///     .input("image.tar")
///     .from(StartPoint::Root)
///     .keep_temp(true)
///     .build();
///
/// assert!(options.output.is_none());
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct SquashOptions {
    /// The export to read. Standard input when absent.
    #[builder(default, setter(strip_option, into))]
    pub input: Option<PathBuf>,

    /// Where to write the squashed export. Standard output when absent.
    #[builder(default, setter(strip_option, into))]
    pub output: Option<PathBuf>,

    /// The name given to the squashed image.
    #[builder(default, setter(strip_option))]
    pub tag: Option<RepoTag>,

    /// The layer after which the squashed layer is inserted.
    #[builder(default, setter(strip_option))]
    pub from: Option<StartPoint>,

    /// Leave the working directory in place after the run.
    #[builder(default)]
    pub keep_temp: bool,

    /// The parent of the working directory.
    #[builder(default, setter(strip_option, into))]
    pub tmp_dir: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SquashOptions {
    /// Returns the directory under which the working directory is created.
    ///
    /// Falls back to `$MONOSQUASH_TMPDIR`, then the system temporary directory.
    pub fn work_dir_parent(&self) -> PathBuf {
        if let Some(dir) = &self.tmp_dir {
            return dir.clone();
        }

        match std::env::var_os(MONOSQUASH_TMPDIR_ENV_VAR) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
