//! The squash pipeline: load, pick a start, collapse, then write the result.

use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use getset::Getters;

use crate::{
    config::SquashOptions,
    export::{self, ExportGraph},
    image::{self, HistoryRecord},
    squash,
    utils::{self, WORK_DIR_PREFIX},
    SquashResult,
};

use super::CleanupWatcher;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a finished squash produced.
#[derive(Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SquashOutcome {
    /// The identifier of the layer holding the collapsed content.
    layer_id: String,

    /// The history of the written image, newest first.
    history: Vec<HistoryRecord>,

    /// The working directory, if it was kept.
    kept_work_dir: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Squashes the export described by `options` and writes the collapsed image.
///
/// The working directory is created under [`SquashOptions::work_dir_parent`] and removed once
/// the run ends, whether it succeeded or not, unless `keep_temp` is set.
pub async fn squash_image(options: &SquashOptions) -> SquashResult<SquashOutcome> {
    let parent = options.work_dir_parent();
    tokio::fs::create_dir_all(&parent).await?;
    let work_dir = tempfile::Builder::new()
        .prefix(WORK_DIR_PREFIX)
        .tempdir_in(&parent)?
        .keep();

    tracing::debug!("working directory: {}", work_dir.display());

    let watcher = if options.keep_temp {
        tracing::info!("keeping working directory {}", work_dir.display());
        None
    } else {
        Some(CleanupWatcher::spawn(&work_dir)?)
    };

    let result = run_pipeline(options, &work_dir).await;

    let cleanup = match watcher {
        Some(watcher) => watcher.finish().await,
        None => Ok(()),
    };

    let (layer_id, history) = result?;
    cleanup?;

    Ok(SquashOutcome {
        layer_id,
        history,
        kept_work_dir: options.keep_temp.then_some(work_dir),
    })
}

async fn run_pipeline(
    options: &SquashOptions,
    work_dir: &Path,
) -> SquashResult<(String, Vec<HistoryRecord>)> {
    let input: Box<dyn Read + Send> = match &options.input {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(std::io::stdin()),
    };

    let mut graph = ExportGraph::load(input, work_dir).await?;
    graph.validate_single_image()?;

    let start = export::resolve_start(&graph, options.from.as_ref())?
        .id()
        .to_string();
    let tip = graph.tip_of(&start)?.id().to_string();
    tracing::info!(
        "squashing {} to {}",
        utils::truncate_id(&start),
        utils::truncate_id(&tip)
    );

    graph.extract_all().await?;

    let squashed = squash::insert_layer(&mut graph, &start, &tip).await?;
    let range_end = if tip == start {
        squashed.clone()
    } else {
        tip.clone()
    };

    squash::squash(&graph, &squashed, &range_end).await?;
    squash::retire_range(&mut graph, &squashed, &range_end).await?;

    graph.pack_layer(&squashed).await?;
    graph.remove_extracted().await?;

    let image_tip = graph.tip_of(&squashed)?.id().to_string();
    if let Some(tag) = &options.tag {
        image::write_tag(&mut graph, tag, &image_tip).await?;
    }

    let output: Box<dyn Write + Send> = match &options.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    image::serialize(&graph, &image_tip, output).await?;

    let history = image::history(&graph, &image_tip)?;
    Ok((squashed, history))
}
