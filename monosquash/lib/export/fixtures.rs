//! Builders for small on-disk exports used by unit tests.

use std::{fs, io, path::Path};

use serde_json::json;
use tar::{Builder, EntryType, Header};

use crate::utils::{LAYER_JSON_FILENAME, LAYER_TAR_FILENAME, LAYER_VERSION, LAYER_VERSION_FILENAME};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

pub(crate) const FROM_CMD: &str = "/bin/sh -c #(nop) ADD file:1a2b in /";

const FIXTURE_MTIME: u64 = 1_600_000_000;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An entry of a fixture layer archive.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Dir(&'static str),
    File(&'static str, &'static str),
    Symlink(&'static str, &'static str),
    HardLink(&'static str, &'static str),
    /// A file owned by the given uid and gid.
    Owned(&'static str, &'static str, u64),
    Fifo(&'static str),
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a 64 character layer id starting with `seed`.
pub(crate) fn layer_id(seed: &str) -> String {
    format!("{seed:f<64}")
}

/// Writes a layer directory with `VERSION`, `json` and `layer.tar`.
pub(crate) fn write_layer(
    work_dir: &Path,
    id: &str,
    parent: &str,
    cmd: &str,
    nodes: &[Node],
) -> anyhow::Result<()> {
    let dir = work_dir.join(id);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(LAYER_VERSION_FILENAME), LAYER_VERSION)?;

    let mut config = json!({
        "id": id,
        "created": "2020-09-13T12:26:40Z",
        "container_config": { "Cmd": cmd.split(' ').collect::<Vec<_>>() },
        "config": { "Env": ["PATH=/usr/bin:/bin"], "Cmd": ["/bin/sh"] },
        "architecture": "amd64",
        "os": "linux",
    });
    if !parent.is_empty() {
        config["parent"] = json!(parent);
    }
    fs::write(dir.join(LAYER_JSON_FILENAME), serde_json::to_vec(&config)?)?;
    fs::write(dir.join(LAYER_TAR_FILENAME), layer_tar(nodes)?)?;

    Ok(())
}

/// Writes a linear chain of layers, root first, and returns their ids.
pub(crate) fn write_chain(
    work_dir: &Path,
    layers: &[(&str, &str, Vec<Node>)],
) -> anyhow::Result<Vec<String>> {
    let mut ids: Vec<String> = Vec::new();
    for (seed, cmd, nodes) in layers {
        let id = layer_id(seed);
        let parent = ids.last().cloned().unwrap_or_default();
        write_layer(work_dir, &id, &parent, cmd, nodes)?;
        ids.push(id);
    }

    Ok(ids)
}

/// Writes the `repositories` file.
pub(crate) fn write_repositories(work_dir: &Path, doc: serde_json::Value) -> anyhow::Result<()> {
    fs::write(work_dir.join("repositories"), serde_json::to_vec(&doc)?)?;
    Ok(())
}

/// Builds a layer archive from fixture nodes.
pub(crate) fn layer_tar(nodes: &[Node]) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    for node in nodes {
        let mut header = Header::new_gnu();
        header.set_mtime(FIXTURE_MTIME);
        header.set_uid(0);
        header.set_gid(0);
        match node {
            Node::Dir(path) => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, path, io::empty())?;
            }
            Node::File(path, content) => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(content.len() as u64);
                builder.append_data(&mut header, path, content.as_bytes())?;
            }
            Node::Symlink(path, target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, path, target)?;
            }
            Node::HardLink(path, target) => {
                header.set_entry_type(EntryType::Link);
                header.set_mode(0o644);
                header.set_size(0);
                builder.append_link(&mut header, path, target)?;
            }
            Node::Owned(path, content, owner) => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o640);
                header.set_uid(*owner);
                header.set_gid(*owner);
                header.set_size(content.len() as u64);
                builder.append_data(&mut header, path, content.as_bytes())?;
            }
            Node::Fifo(path) => {
                header.set_entry_type(EntryType::Fifo);
                header.set_mode(0o600);
                header.set_size(0);
                builder.append_data(&mut header, path, io::empty())?;
            }
        }
    }

    builder.into_inner()
}
