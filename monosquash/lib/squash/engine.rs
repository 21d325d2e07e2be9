use chrono::Utc;
use serde_json::Map;
use tokio::fs;

use crate::{
    export::{ContainerConfig, ExportGraph, LayerConfig, LayerEntry},
    utils::{self, LAYER_VERSION, SQUASH_COMMENT, SQUASH_MARKER},
    SquashError, SquashResult,
};

use super::{merge, LowerView};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Inserts a new empty layer directly after `after_id` and returns its id.
///
/// The new layer becomes the only child of `after_id` and adopts its former children. Its
/// runtime configuration is copied from `tip_id` so the squashed image keeps behaving the same.
///
/// # Errors
/// Returns [`SquashError::LayerNotFound`] if either layer is unknown.
pub async fn insert_layer(
    graph: &mut ExportGraph,
    after_id: &str,
    tip_id: &str,
) -> SquashResult<String> {
    let after = graph
        .get(after_id)
        .ok_or_else(|| SquashError::LayerNotFound(after_id.to_string()))?;
    let tip = graph
        .get(tip_id)
        .ok_or_else(|| SquashError::LayerNotFound(tip_id.to_string()))?;

    let id = utils::new_layer_id();
    let tip_config = tip.get_config();
    let config = LayerConfig {
        id: id.clone(),
        parent: after.id().to_string(),
        created: Some(Utc::now()),
        container_config: Some(ContainerConfig {
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("{SQUASH_MARKER} from {}", utils::truncate_id(after_id)),
            ]),
            extra: Map::new(),
        }),
        config: tip_config.config.clone(),
        comment: Some(SQUASH_COMMENT.to_string()),
        architecture: tip_config.architecture.clone(),
        os: tip_config.os.clone(),
        docker_version: tip_config.docker_version.clone(),
        ..Default::default()
    };

    let mut layer = LayerEntry::new(config, graph.layer_dir(&id));
    fs::create_dir_all(layer.get_dir()).await?;
    fs::write(layer.version_path(), LAYER_VERSION).await?;
    layer.get_config().save(layer.json_path()).await?;

    let extracted = layer.extract_path();
    fs::create_dir_all(&extracted).await?;
    layer.extracted = Some(extracted);

    let former_children = graph.children_of(after_id).to_vec();
    graph.insert(layer);
    for child in former_children {
        graph.reparent(&child, &id).await?;
    }

    tracing::info!(
        "inserted layer {} after {}",
        utils::truncate_id(&id),
        utils::truncate_id(after_id)
    );

    Ok(id)
}

/// Merges the diffs of the layers after `range_start` up to `range_end` into the extracted tree
/// of `range_start`, oldest first.
///
/// `squash(x, x)` leaves the tree of `x` untouched.
///
/// # Errors
/// - [`SquashError::NotAncestor`] if `range_start` is not an ancestor of `range_end`
/// - [`SquashError::NotExtracted`] if a layer involved has no extracted tree
/// - [`SquashError::MergeConflict`] if an entry cannot be overlaid
pub async fn squash(graph: &ExportGraph, range_start: &str, range_end: &str) -> SquashResult<()> {
    let start = graph
        .get(range_start)
        .ok_or_else(|| SquashError::LayerNotFound(range_start.to_string()))?;
    let acc_root = start.require_extracted()?.to_path_buf();

    if range_start == range_end {
        tracing::debug!("nothing to squash after {}", utils::truncate_id(range_start));
        return Ok(());
    }

    let mut range = Vec::new();
    let mut current = graph
        .get(range_end)
        .ok_or_else(|| SquashError::LayerNotFound(range_end.to_string()))?;
    while current.id() != range_start {
        range.push(current);
        if current.get_config().is_root() || range.len() > graph.get_layers().len() {
            return Err(SquashError::NotAncestor {
                start: range_start.to_string(),
                end: range_end.to_string(),
            });
        }

        current = graph
            .get(current.parent())
            .ok_or_else(|| SquashError::DanglingParent {
                layer: current.id().to_string(),
                parent: current.parent().to_string(),
            })?;
    }
    range.reverse();

    let layers = range
        .iter()
        .map(|layer| layer.require_extracted().map(|p| p.to_path_buf()))
        .collect::<SquashResult<Vec<_>>>()?;

    let lower = graph
        .ancestors(range_start)?
        .iter()
        .map(|layer| layer.require_extracted().map(|p| p.to_path_buf()))
        .collect::<SquashResult<Vec<_>>>()?;

    tracing::info!(
        "squashing {} layers into {}",
        layers.len(),
        utils::truncate_id(range_start)
    );

    tokio::task::spawn_blocking(move || {
        merge::merge_layers(&acc_root, &layers, &LowerView::new(lower))
    })
    .await?
}

/// Drops the layers after `keep_tip` up to `range_end` from the graph and deletes their
/// directories.
///
/// Children of `range_end` move under `keep_tip`, and tags that named a dropped layer name
/// `keep_tip` instead.
pub async fn retire_range(
    graph: &mut ExportGraph,
    keep_tip: &str,
    range_end: &str,
) -> SquashResult<()> {
    if keep_tip == range_end {
        return Ok(());
    }

    let mut retired = Vec::new();
    let mut current = graph.by_exact_id(range_end)?;
    while current.id() != keep_tip {
        retired.push(current.id().to_string());
        if current.get_config().is_root() || retired.len() > graph.get_layers().len() {
            return Err(SquashError::NotAncestor {
                start: keep_tip.to_string(),
                end: range_end.to_string(),
            });
        }
        current = graph.by_exact_id(current.parent())?;
    }

    for child in graph.children_of(range_end).to_vec() {
        graph.reparent(&child, keep_tip).await?;
    }

    let mut moved_tags = 0;
    for id in &retired {
        if let Some(layer) = graph.remove(id) {
            let dir = layer.get_dir().clone();
            tokio::task::spawn_blocking(move || utils::remove_tree(dir)).await??;
        }

        moved_tags += graph.tags_mut().repoint(id, keep_tip);
        tracing::debug!("retired layer {}", utils::truncate_id(id));
    }

    if moved_tags > 0 {
        graph.save_tags().await?;
    }

    tracing::info!(
        "retired {} layers, {} is the new tip",
        retired.len(),
        utils::truncate_id(keep_tip)
    );

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
