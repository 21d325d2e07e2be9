use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a monosquash-related operation.
pub type SquashResult<T> = Result<T, SquashError>;

/// An error that occurred while loading, squashing or writing an image export.
#[derive(Debug, Error)]
pub enum SquashError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A system call failed.
    #[error("system error: {0}")]
    Nix(#[from] nix::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An archive could not be extracted or packed.
    #[error("archive error for {path}: {detail}")]
    Archive {
        /// The archive or directory being processed.
        path: PathBuf,

        /// The diagnostic output of the underlying archive operation.
        detail: String,
    },

    /// A layer metadata document could not be read or written.
    #[error("malformed metadata at {path}: {source}")]
    Metadata {
        /// The metadata file.
        path: PathBuf,

        /// The underlying decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The export holds more than one image.
    #[error("ambiguous export: {0}")]
    AmbiguousExport(String),

    /// A `repository:tag` argument has an empty half.
    #[error("bad tag format: {0}")]
    InvalidTag(String),

    /// No layer matches the requested identifier.
    #[error("no layer matching {0}")]
    LayerNotFound(String),

    /// More than one layer matches the requested identifier prefix.
    #[error("{0} is ambiguous")]
    AmbiguousLayerId(String),

    /// A layer names a parent that is not part of the export.
    #[error("layer {layer} has dangling parent {parent}")]
    DanglingParent {
        /// The layer holding the reference.
        layer: String,

        /// The parent identifier that could not be resolved.
        parent: String,
    },

    /// The start of a squash range is not an ancestor of its end.
    #[error("layer {start} is not an ancestor of {end}")]
    NotAncestor {
        /// The start of the range.
        start: String,

        /// The end of the range.
        end: String,
    },

    /// A layer's diff has not been extracted yet.
    #[error("layer {0} has not been extracted")]
    NotExtracted(String),

    /// A layer entry cannot be overlaid on the accumulated tree.
    #[error("merge conflict at {path}: {reason}")]
    MergeConflict {
        /// The conflicting path, relative to the layer root.
        path: PathBuf,

        /// Why the entry cannot be applied.
        reason: String,
    },

    /// A blocking task failed to complete.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SquashError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> SquashError {
        SquashError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Creates an archive error whose detail carries `error` and each of its causes.
    pub fn archive(path: impl Into<PathBuf>, error: impl Into<anyhow::Error>) -> SquashError {
        SquashError::Archive {
            path: path.into(),
            detail: format!("{:#}", error.into()),
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `SquashResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> SquashResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
