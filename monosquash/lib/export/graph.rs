use std::{collections::HashMap, io::Read, path::PathBuf};

use getset::Getters;
use tokio::fs;

use crate::{
    archive,
    utils::{self, FROM_MARKER, LAYER_JSON_FILENAME, REPOSITORIES_FILENAME, SQUASH_MARKER},
    SquashError, SquashResult,
};

use super::{LayerConfig, LayerEntry, TagIndex};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The layers of an unpacked export, keyed by id.
///
/// Parent links live in each layer's metadata. The `children` index mirrors them and is kept in
/// sync by every mutation.
#[derive(Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ExportGraph {
    /// Every layer of the export.
    layers: HashMap<String, LayerEntry>,

    /// Child ids of each layer that has children, sorted.
    children: HashMap<String, Vec<String>>,

    /// The repository tags of the export.
    tags: TagIndex,

    /// The directory the export is unpacked in.
    work_dir: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExportGraph {
    /// Unpacks an export archive into `work_dir` and loads it.
    ///
    /// `source` may be a file or a byte stream such as standard input.
    pub async fn load(
        source: impl Read + Send + 'static,
        work_dir: impl Into<PathBuf>,
    ) -> SquashResult<Self> {
        let work_dir = work_dir.into();

        let dest = work_dir.clone();
        let entries =
            tokio::task::spawn_blocking(move || archive::extract_stream(source, &dest)).await??;
        tracing::debug!("unpacked {entries} export entries into {}", work_dir.display());

        Self::open(work_dir).await
    }

    /// Loads an export already unpacked in `work_dir`.
    ///
    /// # Errors
    /// - [`SquashError::Metadata`] if a layer's `json` or the `repositories` file is malformed
    /// - [`SquashError::DanglingParent`] if a layer names a parent that is not in the export
    /// - [`SquashError::Custom`] if a layer's metadata names a different id than its directory
    pub async fn open(work_dir: impl Into<PathBuf>) -> SquashResult<Self> {
        let work_dir = work_dir.into();
        let tags = TagIndex::load(work_dir.join(REPOSITORIES_FILENAME)).await?;

        let mut layers = HashMap::new();
        let mut dir_entries = fs::read_dir(&work_dir).await?;
        while let Some(entry) = dir_entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let dir = entry.path();
            let json_path = dir.join(LAYER_JSON_FILENAME);
            if !fs::try_exists(&json_path).await? {
                tracing::debug!("skipping {}, no layer metadata", dir.display());
                continue;
            }

            let config = LayerConfig::load(&json_path).await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if config.id != name {
                return Err(SquashError::custom(anyhow::anyhow!(
                    "layer directory {name} holds metadata for layer {}",
                    config.id
                )));
            }

            let mut layer = LayerEntry::new(config, dir);
            layer.packed_size = fs::metadata(layer.tar_path()).await.ok().map(|m| m.len());
            layers.insert(name, layer);
        }

        let mut graph = Self {
            layers,
            children: HashMap::new(),
            tags,
            work_dir,
        };
        graph.rebuild_children()?;

        tracing::info!(
            "loaded {} layers from {}",
            graph.layers.len(),
            graph.work_dir.display()
        );

        Ok(graph)
    }

    /// Rejects exports that hold more than one image.
    ///
    /// An export is a single image when each repository tags one layer id, there is one root
    /// layer, and no layer has more than one child.
    pub fn validate_single_image(&self) -> SquashResult<()> {
        self.tags.validate_single_image()?;

        for (_, _, id) in self.tags.iter() {
            if !self.layers.contains_key(id) {
                return Err(SquashError::LayerNotFound(id.to_string()));
            }
        }

        let roots = self.layers.values().filter(|l| l.config.is_root()).count();
        if roots > 1 {
            return Err(SquashError::AmbiguousExport(format!(
                "export holds {roots} unrelated root layers"
            )));
        }

        let mut branching: Vec<_> = self
            .children
            .iter()
            .filter(|(_, kids)| kids.len() > 1)
            .map(|(parent, _)| parent.as_str())
            .collect();
        branching.sort_unstable();
        if let Some(parent) = branching.first() {
            return Err(SquashError::AmbiguousExport(format!(
                "layer {} has several children",
                utils::truncate_id(parent)
            )));
        }

        Ok(())
    }

    /// Returns the layer with exactly this id.
    pub fn get(&self, id: &str) -> Option<&LayerEntry> {
        self.layers.get(id)
    }

    /// Returns the layer with this id, or the only layer whose id starts with it.
    pub fn by_id(&self, id: &str) -> SquashResult<&LayerEntry> {
        if let Some(layer) = self.layers.get(id) {
            return Ok(layer);
        }

        if id.is_empty() {
            return Err(SquashError::LayerNotFound(id.to_string()));
        }

        let matches: Vec<_> = self
            .layers
            .values()
            .filter(|layer| layer.id().starts_with(id))
            .collect();

        match matches.as_slice() {
            [layer] => Ok(layer),
            [] => Err(SquashError::LayerNotFound(id.to_string())),
            _ => Err(SquashError::AmbiguousLayerId(id.to_string())),
        }
    }

    /// Returns the layer without a parent.
    pub fn root(&self) -> SquashResult<&LayerEntry> {
        self.layers
            .values()
            .filter(|layer| layer.config.is_root())
            .min_by(|a, b| a.id().cmp(b.id()))
            .ok_or_else(|| SquashError::LayerNotFound("root".to_string()))
    }

    /// Returns the ids of the children of `id`.
    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the first child of `id`, if any.
    pub fn child_of(&self, id: &str) -> Option<&LayerEntry> {
        self.children_of(id)
            .first()
            .and_then(|child| self.layers.get(child))
    }

    /// Follows children from `id` to the end of its chain.
    pub fn tip_of(&self, id: &str) -> SquashResult<&LayerEntry> {
        let mut current = self
            .layers
            .get(id)
            .ok_or_else(|| SquashError::LayerNotFound(id.to_string()))?;

        for _ in 0..self.layers.len() {
            match self.child_of(current.id()) {
                Some(child) => current = child,
                None => return Ok(current),
            }
        }

        Err(SquashError::custom(anyhow::anyhow!(
            "layer graph has a cycle through {}",
            utils::truncate_id(id)
        )))
    }

    /// Returns the ancestors of `id`, nearest first. The layer itself is not included.
    pub fn ancestors(&self, id: &str) -> SquashResult<Vec<&LayerEntry>> {
        let mut current = self
            .layers
            .get(id)
            .ok_or_else(|| SquashError::LayerNotFound(id.to_string()))?;

        let mut ancestors = Vec::new();
        while !current.config.is_root() {
            let parent = self.layers.get(current.parent()).ok_or_else(|| {
                SquashError::DanglingParent {
                    layer: current.id().to_string(),
                    parent: current.parent().to_string(),
                }
            })?;

            if ancestors.len() >= self.layers.len() {
                return Err(SquashError::custom(anyhow::anyhow!(
                    "layer graph has a cycle through {}",
                    utils::truncate_id(id)
                )));
            }

            ancestors.push(parent);
            current = parent;
        }

        Ok(ancestors)
    }

    /// Returns the chain of layers from the root down to `tip`.
    pub fn chain_to(&self, tip: &str) -> SquashResult<Vec<&LayerEntry>> {
        let mut chain = self.ancestors(tip)?;
        chain.reverse();
        chain.push(self.by_exact_id(tip)?);
        Ok(chain)
    }

    /// Returns the chain from the root to the end of its line, or nothing without a root.
    pub fn lineage(&self) -> Vec<&LayerEntry> {
        let Ok(root) = self.root() else {
            return Vec::new();
        };

        match self.tip_of(root.id()) {
            Ok(tip) => self.chain_to(tip.id()).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Returns the most recent layer created by an earlier squash.
    pub fn squash_marker(&self) -> Option<&LayerEntry> {
        self.lineage()
            .into_iter()
            .rev()
            .find(|layer| layer.config.command().contains(SQUASH_MARKER))
    }

    /// Returns the first layer that adds a base filesystem.
    pub fn from_boundary(&self) -> Option<&LayerEntry> {
        self.lineage()
            .into_iter()
            .find(|layer| layer.config.command().contains(FROM_MARKER))
    }

    /// Extracts every layer's `layer.tar` into its `layer` directory.
    pub async fn extract_all(&mut self) -> SquashResult<()> {
        let mut ids: Vec<String> = self.layers.keys().cloned().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(layer) = self.layers.get_mut(&id) else {
                continue;
            };

            let tar_path = layer.tar_path();
            let dest = layer.extract_path();
            let target = dest.clone();
            let entries =
                tokio::task::spawn_blocking(move || archive::extract(&tar_path, &target))
                    .await??;

            tracing::debug!("extracted {entries} entries of {}", utils::truncate_id(&id));
            layer.extracted = Some(dest);
        }

        Ok(())
    }

    /// Packs a layer's extracted tree into its `layer.tar` and records the size.
    pub async fn pack_layer(&mut self, id: &str) -> SquashResult<u64> {
        let layer = self
            .layers
            .get_mut(id)
            .ok_or_else(|| SquashError::LayerNotFound(id.to_string()))?;

        let src = layer.require_extracted()?.to_path_buf();
        let tar_path = layer.tar_path();
        let size = tokio::task::spawn_blocking(move || archive::pack(&src, &tar_path)).await??;

        layer.packed_size = Some(size);
        layer.config.size = Some(size);
        layer.config.save(layer.json_path()).await?;

        tracing::debug!("packed {} ({size} bytes)", utils::truncate_id(id));
        Ok(size)
    }

    /// Removes every extracted tree. Missing trees are ignored.
    pub async fn remove_extracted(&mut self) -> SquashResult<()> {
        for layer in self.layers.values_mut() {
            let path = layer.extract_path();
            tokio::task::spawn_blocking(move || utils::remove_tree(path)).await??;
            layer.extracted = None;
        }

        Ok(())
    }

    /// Returns a mutable handle on the repository tags.
    pub fn tags_mut(&mut self) -> &mut TagIndex {
        &mut self.tags
    }

    /// Writes the repository tags back to the `repositories` file.
    pub async fn save_tags(&self) -> SquashResult<()> {
        self.tags
            .save(self.work_dir.join(REPOSITORIES_FILENAME))
            .await
    }

    /// Adds a layer and links it under its parent.
    pub(crate) fn insert(&mut self, layer: LayerEntry) {
        let id = layer.id().to_string();
        if !layer.config.is_root() {
            let siblings = self.children.entry(layer.parent().to_string()).or_default();
            siblings.push(id.clone());
            siblings.sort_unstable();
        }

        self.layers.insert(id, layer);
    }

    /// Removes a layer and unlinks it from its parent. Its own children must be moved first.
    pub(crate) fn remove(&mut self, id: &str) -> Option<LayerEntry> {
        let layer = self.layers.remove(id)?;
        if let Some(siblings) = self.children.get_mut(layer.parent()) {
            siblings.retain(|child| child != id);
            if siblings.is_empty() {
                self.children.remove(layer.parent());
            }
        }

        self.children.remove(id);
        Some(layer)
    }

    /// Moves `id` under `new_parent` and rewrites its metadata.
    pub(crate) async fn reparent(&mut self, id: &str, new_parent: &str) -> SquashResult<()> {
        let kept_children = self.children.remove(id);
        let mut layer = self
            .remove(id)
            .ok_or_else(|| SquashError::LayerNotFound(id.to_string()))?;

        layer.config.parent = new_parent.to_string();
        layer.config.save(layer.json_path()).await?;
        self.insert(layer);

        if let Some(kids) = kept_children {
            self.children.insert(id.to_string(), kids);
        }

        tracing::debug!(
            "reparented {} onto {}",
            utils::truncate_id(id),
            utils::truncate_id(new_parent)
        );

        Ok(())
    }

    pub(crate) fn by_exact_id(&self, id: &str) -> SquashResult<&LayerEntry> {
        self.layers
            .get(id)
            .ok_or_else(|| SquashError::LayerNotFound(id.to_string()))
    }

    fn rebuild_children(&mut self) -> SquashResult<()> {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for layer in self.layers.values() {
            if layer.config.is_root() {
                continue;
            }

            if !self.layers.contains_key(layer.parent()) {
                return Err(SquashError::DanglingParent {
                    layer: layer.id().to_string(),
                    parent: layer.parent().to_string(),
                });
            }

            children
                .entry(layer.parent().to_string())
                .or_default()
                .push(layer.id().to_string());
        }

        for kids in children.values_mut() {
            kids.sort_unstable();
        }

        self.children = children;
        Ok(())
    }

    /// Returns the path of a layer directory by id.
    pub fn layer_dir(&self, id: &str) -> PathBuf {
        self.work_dir.join(id)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use crate::{
        config::StartPoint,
        export::{
            fixtures::{layer_id, write_chain, write_layer, write_repositories, Node, FROM_CMD},
            resolve_start,
        },
    };

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_graph_open_links_parents_and_children() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let ids = write_chain(
            temp.path(),
            &[
                ("a", "/bin/sh -c #(nop) MAINTAINER me", vec![]),
                ("b", FROM_CMD, vec![Node::File("etc/hostname", "box\n")]),
                ("c", "/bin/sh -c echo hi", vec![]),
            ],
        )?;

        let graph = ExportGraph::open(temp.path()).await?;
        assert_eq!(graph.get_layers().len(), 3);
        assert_eq!(graph.root()?.id(), ids[0]);
        assert_eq!(graph.children_of(&ids[0]), &[ids[1].clone()]);
        assert_eq!(graph.tip_of(&ids[0])?.id(), ids[2]);

        let chain: Vec<_> = graph.chain_to(&ids[2])?.iter().map(|l| l.id()).collect();
        assert_eq!(chain, vec![ids[0].as_str(), ids[1].as_str(), ids[2].as_str()]);

        let ancestors: Vec<_> = graph.ancestors(&ids[2])?.iter().map(|l| l.id()).collect();
        assert_eq!(ancestors, vec![ids[1].as_str(), ids[0].as_str()]);

        assert!(graph.get(&ids[1]).and_then(|l| *l.get_packed_size()).is_some());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_graph_by_id_prefix_matching() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = layer_id("ab1");
        let child = layer_id("ab2");
        write_layer(temp.path(), &root, "", FROM_CMD, &[])?;
        write_layer(temp.path(), &child, &root, "/bin/sh -c true", &[])?;

        let graph = ExportGraph::open(temp.path()).await?;
        assert_eq!(graph.by_id(&child)?.id(), child);
        assert_eq!(graph.by_id("ab2")?.id(), child);
        assert!(matches!(
            graph.by_id("ab"),
            Err(SquashError::AmbiguousLayerId(_))
        ));
        match graph.by_id("0123") {
            Err(e @ SquashError::LayerNotFound(_)) => {
                assert_eq!(e.to_string(), "no layer matching 0123")
            }
            other => panic!("expected LayerNotFound, got {other:?}"),
        }

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_graph_rejects_dangling_parent() -> anyhow::Result<()> {
        let temp = tempdir()?;
        write_layer(temp.path(), &layer_id("a"), &layer_id("9"), FROM_CMD, &[])?;

        assert!(matches!(
            ExportGraph::open(temp.path()).await,
            Err(SquashError::DanglingParent { .. })
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_graph_rejects_multi_image_export_before_extraction() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let ids = write_chain(
            temp.path(),
            &[
                ("a", FROM_CMD, vec![Node::File("x", "1")]),
                ("b", "/bin/sh -c true", vec![]),
            ],
        )?;
        write_repositories(
            temp.path(),
            json!({ "app": { "v1": ids[0], "v2": ids[1] } }),
        )?;

        let graph = ExportGraph::open(temp.path()).await?;
        assert!(matches!(
            graph.validate_single_image(),
            Err(SquashError::AmbiguousExport(_))
        ));

        // Nothing was extracted.
        for id in &ids {
            assert!(!temp.path().join(id).join("layer").exists());
        }

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_graph_rejects_branching_export() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let root = layer_id("a");
        write_layer(temp.path(), &root, "", FROM_CMD, &[])?;
        write_layer(temp.path(), &layer_id("b"), &root, "/bin/sh -c one", &[])?;
        write_layer(temp.path(), &layer_id("c"), &root, "/bin/sh -c two", &[])?;

        let graph = ExportGraph::open(temp.path()).await?;
        assert!(matches!(
            graph.validate_single_image(),
            Err(SquashError::AmbiguousExport(_))
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_resolve_start_order() -> anyhow::Result<()> {
        // No squash marker: the first FROM layer wins.
        let temp = tempdir()?;
        let ids = write_chain(
            temp.path(),
            &[
                ("a", "/bin/sh -c #(nop) MAINTAINER me", vec![]),
                ("b", FROM_CMD, vec![]),
                ("c", FROM_CMD, vec![]),
                ("d", "/bin/sh -c make", vec![]),
            ],
        )?;
        let graph = ExportGraph::open(temp.path()).await?;
        assert_eq!(resolve_start(&graph, None)?.id(), ids[1]);
        assert_eq!(resolve_start(&graph, Some(&StartPoint::Root))?.id(), ids[0]);
        assert_eq!(
            resolve_start(&graph, Some(&StartPoint::Layer("d".to_string())))?.id(),
            ids[3]
        );
        assert!(matches!(
            resolve_start(&graph, Some(&StartPoint::Layer("0".to_string()))),
            Err(SquashError::LayerNotFound(_))
        ));

        // Squash markers beat FROM layers, and the most recent one is used.
        let temp = tempdir()?;
        let ids = write_chain(
            temp.path(),
            &[
                ("a", FROM_CMD, vec![]),
                ("b", "/bin/sh -c #(squash) from aaaaaaaaaaaa", vec![]),
                ("c", "/bin/sh -c make", vec![]),
                ("d", "/bin/sh -c #(squash) from cccccccccccc", vec![]),
                ("e", "/bin/sh -c make install", vec![]),
            ],
        )?;
        let graph = ExportGraph::open(temp.path()).await?;
        assert_eq!(resolve_start(&graph, None)?.id(), ids[3]);

        // Neither: the root.
        let temp = tempdir()?;
        let ids = write_chain(
            temp.path(),
            &[("a", "/bin/sh -c true", vec![]), ("b", "/bin/sh -c make", vec![])],
        )?;
        let graph = ExportGraph::open(temp.path()).await?;
        assert_eq!(resolve_start(&graph, None)?.id(), ids[0]);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_graph_extract_and_remove_extracted() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let ids = write_chain(
            temp.path(),
            &[
                ("a", FROM_CMD, vec![Node::Dir("etc/"), Node::File("etc/os", "linux")]),
                ("b", "/bin/sh -c true", vec![]),
            ],
        )?;

        let mut graph = ExportGraph::open(temp.path()).await?;
        graph.extract_all().await?;

        let extracted = graph.by_id(&ids[0])?.require_extracted()?.to_path_buf();
        assert_eq!(fs::read_to_string(extracted.join("etc/os")).await?, "linux");
        assert!(graph.by_id(&ids[1])?.require_extracted()?.is_dir());

        graph.remove_extracted().await?;
        assert!(!extracted.exists());
        assert!(matches!(
            graph.by_id(&ids[0])?.require_extracted(),
            Err(SquashError::NotExtracted(_))
        ));

        // Packed archives and metadata are untouched.
        assert!(temp.path().join(&ids[0]).join("layer.tar").is_file());
        Ok(())
    }
}
