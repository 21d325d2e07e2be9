//! Loading a saved image export into a graph of layers.
//!
//! A legacy `docker save` export holds a `repositories` file that maps repository tags to layer
//! ids, and one directory per layer:
//!
//! ```text
//! export/
//! ├── repositories
//! ├── <id>/
//! │   ├── VERSION
//! │   ├── json
//! │   └── layer.tar
//! └── <id>/
//!     └── ...
//! ```
//!
//! [`ExportGraph`] keeps every layer in an arena keyed by id, together with an index of each
//! layer's children.

#[cfg(test)]
pub(crate) mod fixtures;
mod graph;
mod layer;
mod start;
mod tags;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use graph::*;
pub use layer::*;
pub use start::*;
pub use tags::*;
