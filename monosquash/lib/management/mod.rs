//! Running a squash end to end.

pub mod cleanup;
pub mod squash;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cleanup::CleanupWatcher;
