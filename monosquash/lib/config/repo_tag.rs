use std::{
    fmt::{self, Display},
    str::FromStr,
};

use getset::Getters;

use crate::SquashError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The tag used when a `repository` argument carries none.
pub const DEFAULT_TAG: &str = "latest";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A `repository[:tag]` name given to the squashed image.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct RepoTag {
    /// The repository name, e.g. `myrepo` or `registry:5000/team/app`.
    repo: String,

    /// The tag within the repository.
    tag: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RepoTag {
    /// Creates a new repository tag.
    pub fn new(repo: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            tag: tag.into(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for RepoTag {
    type Err = SquashError;

    /// Parses `repo` or `repo:tag`.
    ///
    /// The tag separator is the last `:` after the final `/`, so registry ports stay part of the
    /// repository name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name_start = s.rfind('/').map_or(0, |idx| idx + 1);
        let (repo, tag) = match s[name_start..].rfind(':') {
            Some(idx) => {
                let idx = name_start + idx;
                (&s[..idx], &s[idx + 1..])
            }
            None => (s, DEFAULT_TAG),
        };

        if repo.is_empty() || tag.is_empty() {
            return Err(SquashError::InvalidTag(s.to_string()));
        }

        Ok(Self::new(repo, tag))
    }
}

impl Display for RepoTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo, self.tag)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
