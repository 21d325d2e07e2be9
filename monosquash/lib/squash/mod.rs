//! Squashing a range of layers into one.
//!
//! [`insert_layer`] splices an empty layer into the chain, [`squash`] merges the diffs of a
//! range of layers into it under overlay whiteout rules, and [`retire_range`] drops the merged
//! layers from the graph.

mod engine;
mod lower;
mod merge;
mod perm_guard;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use engine::*;
pub use lower::*;
pub use merge::*;
pub use perm_guard::*;
