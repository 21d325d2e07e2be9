use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use crate::{
    utils::{
        EXTRACTED_LAYER_SUBDIR, LAYER_JSON_FILENAME, LAYER_TAR_FILENAME, LAYER_VERSION_FILENAME,
    },
    SquashError, SquashResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The metadata document of a layer, stored as `<id>/json`.
///
/// Only the fields this crate reads or writes are modelled. Everything else is kept in `extra`
/// so a document survives a load and save unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// The layer id.
    pub id: String,

    /// The id of the parent layer. Empty for the root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,

    /// When the layer was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// The container the layer was committed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_config: Option<ContainerConfig>,

    /// The same as `container_config`, as spelled by older exports.
    #[serde(
        rename = "ContainerConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_container_config: Option<ContainerConfig>,

    /// The runtime configuration of the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,

    /// A free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// The architecture the layer was built for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// The operating system the layer was built for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// The version of the daemon that built the layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_version: Option<String>,

    /// The size of the layer's diff in bytes.
    #[serde(rename = "Size", default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The subset of a container configuration used to describe a layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// The command that produced the layer.
    #[serde(rename = "Cmd", default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A layer of an export together with where its files live in the working directory.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LayerEntry {
    /// The parsed metadata document.
    pub(crate) config: LayerConfig,

    /// The `<id>` directory of the layer.
    pub(crate) dir: PathBuf,

    /// The directory holding the extracted diff, once extracted.
    pub(crate) extracted: Option<PathBuf>,

    /// The size of `layer.tar` on disk, once known.
    pub(crate) packed_size: Option<u64>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerConfig {
    /// Reads a metadata document.
    pub async fn load(path: impl AsRef<Path>) -> SquashResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|source| SquashError::Metadata {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the metadata document.
    pub async fn save(&self, path: impl AsRef<Path>) -> SquashResult<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec(self).map_err(|source| SquashError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;

        fs::write(path, bytes).await?;
        Ok(())
    }

    /// Returns the command that produced the layer, joined with spaces.
    pub fn command(&self) -> String {
        self.container_config
            .as_ref()
            .or(self.legacy_container_config.as_ref())
            .and_then(|c| c.cmd.as_ref())
            .map(|cmd| cmd.join(" "))
            .unwrap_or_default()
    }

    /// Whether the layer has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_empty()
    }
}

impl LayerEntry {
    /// Creates an entry for the layer directory `dir`.
    pub fn new(config: LayerConfig, dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            dir: dir.into(),
            extracted: None,
            packed_size: None,
        }
    }

    /// Returns the layer id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Returns the parent layer id. Empty for the root.
    pub fn parent(&self) -> &str {
        &self.config.parent
    }

    /// Returns the path of the metadata document.
    pub fn json_path(&self) -> PathBuf {
        self.dir.join(LAYER_JSON_FILENAME)
    }

    /// Returns the path of the packed diff.
    pub fn tar_path(&self) -> PathBuf {
        self.dir.join(LAYER_TAR_FILENAME)
    }

    /// Returns the path of the version marker.
    pub fn version_path(&self) -> PathBuf {
        self.dir.join(LAYER_VERSION_FILENAME)
    }

    /// Returns where the diff is extracted to.
    pub fn extract_path(&self) -> PathBuf {
        self.dir.join(EXTRACTED_LAYER_SUBDIR)
    }

    /// Returns the extracted diff or fails with [`SquashError::NotExtracted`].
    pub fn require_extracted(&self) -> SquashResult<&Path> {
        self.extracted
            .as_deref()
            .ok_or_else(|| SquashError::NotExtracted(self.config.id.clone()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
