//! Reading and writing layer archives.
//!
//! A layer archive is a plain or gzip-compressed tar of a filesystem diff. Extraction keeps
//! permissions, modification times, extended attributes, hard links, FIFOs and device nodes, and
//! ownership when running as root. Packing produces a deterministic archive of a directory tree.

mod extract;
mod pack;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use extract::*;
pub use pack::*;
