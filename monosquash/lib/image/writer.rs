use std::{io::Write, path::PathBuf};

use tar::{Builder, HeaderMode};
use tokio::fs;

use crate::{
    config::RepoTag,
    export::ExportGraph,
    utils::{self, REPOSITORIES_FILENAME},
    SquashError, SquashResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Points `repo_tag` at `layer_id`, replacing the repository's other tags, and rewrites the
/// `repositories` file.
pub async fn write_tag(
    graph: &mut ExportGraph,
    repo_tag: &RepoTag,
    layer_id: &str,
) -> SquashResult<()> {
    graph.by_exact_id(layer_id)?;
    graph.tags_mut().set(repo_tag, layer_id);
    graph.save_tags().await?;

    tracing::info!("tagged {} as {repo_tag}", utils::truncate_id(layer_id));
    Ok(())
}

/// Streams the chain ending at `tip_id` as an export archive into `out` and returns `out`.
///
/// For each layer, root first, the archive holds `<id>/`, `<id>/VERSION`, `<id>/json` and
/// `<id>/layer.tar`. The `repositories` file comes last. Nothing else in the working directory
/// is included.
pub async fn serialize<W>(graph: &ExportGraph, tip_id: &str, out: W) -> SquashResult<W>
where
    W: Write + Send + 'static,
{
    let repositories = graph.get_work_dir().join(REPOSITORIES_FILENAME);
    if !fs::try_exists(&repositories).await? {
        graph.save_tags().await?;
    }

    let mut plan: Vec<(String, PathBuf, bool)> = Vec::new();
    for layer in graph.chain_to(tip_id)? {
        let id = layer.id();
        plan.push((id.to_string(), layer.get_dir().clone(), true));
        plan.push((format!("{id}/VERSION"), layer.version_path(), false));
        plan.push((format!("{id}/json"), layer.json_path(), false));
        plan.push((format!("{id}/layer.tar"), layer.tar_path(), false));
    }
    plan.push((REPOSITORIES_FILENAME.to_string(), repositories, false));

    let layers = (plan.len() - 1) / 4;
    let out = tokio::task::spawn_blocking(move || -> SquashResult<W> {
        let mut builder = Builder::new(out);
        builder.mode(HeaderMode::Complete);
        builder.follow_symlinks(false);

        for (name, path, is_dir) in plan {
            let result = if is_dir {
                builder.append_dir(&name, &path)
            } else {
                builder.append_path_with_name(&path, &name)
            };
            result.map_err(|e| SquashError::archive(&path, e))?;
        }

        let mut out = builder
            .into_inner()
            .map_err(|e| SquashError::archive("<output>", e))?;
        out.flush()?;

        Ok(out)
    })
    .await??;

    tracing::info!("wrote {layers} layers ending at {}", utils::truncate_id(tip_id));
    Ok(out)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
