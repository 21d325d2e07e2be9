//! Writing the squashed image back out.

mod history;
mod writer;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use history::*;
pub use writer::*;
