use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{config::RepoTag, SquashError, SquashResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The `repositories` file of an export: repository name to tag to layer id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagIndex {
    repositories: BTreeMap<String, BTreeMap<String, String>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TagIndex {
    /// Reads the tag index. A missing file is an empty index.
    pub async fn load(path: impl AsRef<Path>) -> SquashResult<Self> {
        let path = path.as_ref();
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no tag index at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|source| SquashError::Metadata {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the tag index.
    pub async fn save(&self, path: impl AsRef<Path>) -> SquashResult<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec(self).map_err(|source| SquashError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;

        fs::write(path, bytes).await?;
        Ok(())
    }

    /// Rejects an index in which one repository names more than one image.
    pub fn validate_single_image(&self) -> SquashResult<()> {
        for (repo, tags) in &self.repositories {
            let ids: BTreeSet<&String> = tags.values().collect();
            if ids.len() > 1 {
                tracing::error!("repository {repo} tags {} different images", ids.len());
                return Err(SquashError::AmbiguousExport(
                    "full repository export with multiple images - must specify a concrete layer or tag"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Replaces every tag of the repository with a single tag pointing at `layer_id`.
    pub fn set(&mut self, repo_tag: &RepoTag, layer_id: impl Into<String>) {
        let tags = BTreeMap::from([(repo_tag.get_tag().clone(), layer_id.into())]);
        self.repositories.insert(repo_tag.get_repo().clone(), tags);
    }

    /// Points every tag that references `from` at `to` instead. Returns how many tags moved.
    pub fn repoint(&mut self, from: &str, to: &str) -> usize {
        let mut moved = 0;
        for id in self.repositories.values_mut().flat_map(|tags| tags.values_mut()) {
            if id == from {
                *id = to.to_string();
                moved += 1;
            }
        }

        moved
    }

    /// Looks up the layer id of `repo:tag`.
    pub fn get(&self, repo: &str, tag: &str) -> Option<&str> {
        self.repositories
            .get(repo)
            .and_then(|tags| tags.get(tag))
            .map(String::as_str)
    }

    /// Iterates over every `(repo, tag, id)` triple.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.repositories.iter().flat_map(|(repo, tags)| {
            tags.iter()
                .map(move |(tag, id)| (repo.as_str(), tag.as_str(), id.as_str()))
        })
    }

    /// Whether the index names no images.
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
