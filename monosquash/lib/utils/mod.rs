//! Utility functions and types.

mod file;
mod format;
mod id;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use file::*;
pub use format::*;
pub use id::*;
pub use path::*;
