use std::{
    fmt::{self, Display},
    str::FromStr,
};

use crate::SquashError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The `--from` value that selects the root layer.
pub const ROOT_ALIAS: &str = "root";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An explicit choice of the layer after which the squashed layer is inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPoint {
    /// The root layer of the export.
    Root,

    /// A layer id or unique id prefix.
    Layer(String),
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for StartPoint {
    type Err = SquashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(SquashError::LayerNotFound(s.to_string())),
            ROOT_ALIAS => Ok(StartPoint::Root),
            id => Ok(StartPoint::Layer(id.to_string())),
        }
    }
}

impl Display for StartPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPoint::Root => write!(f, "{ROOT_ALIAS}"),
            StartPoint::Layer(id) => write!(f, "{id}"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
