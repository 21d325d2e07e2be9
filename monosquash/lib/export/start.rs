use crate::{config::StartPoint, utils, SquashResult};

use super::{ExportGraph, LayerEntry};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Chooses the layer after which the squashed layer is inserted.
///
/// An explicit start point wins and fails if it cannot be resolved. Otherwise the most recent
/// earlier squash is used, then the first layer that adds a base filesystem, then the root.
pub fn resolve_start<'a>(
    graph: &'a ExportGraph,
    from: Option<&StartPoint>,
) -> SquashResult<&'a LayerEntry> {
    let start = match from {
        Some(StartPoint::Root) => graph.root()?,
        Some(StartPoint::Layer(id)) => graph.by_id(id)?,
        None => {
            if let Some(layer) = graph.squash_marker() {
                tracing::debug!("starting after earlier squash {}", utils::truncate_id(layer.id()));
                layer
            } else if let Some(layer) = graph.from_boundary() {
                tracing::debug!("starting after base layer {}", utils::truncate_id(layer.id()));
                layer
            } else {
                graph.root()?
            }
        }
    };

    Ok(start)
}
