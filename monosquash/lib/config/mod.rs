//! Configuration types and helpers.

mod options;
mod repo_tag;
mod start_point;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use options::*;
pub use repo_tag::*;
pub use start_point::*;
