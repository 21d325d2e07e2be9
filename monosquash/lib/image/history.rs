use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    export::ExportGraph,
    utils::{self, SHORT_ID_LEN},
    SquashResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The longest command shown in a history record.
pub const HISTORY_COMMAND_LEN: usize = 60;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One line of an image's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    /// The short layer id.
    pub id: String,

    /// When the layer was created.
    pub created: Option<DateTime<Utc>>,

    /// The command that produced the layer, cut to [`HISTORY_COMMAND_LEN`] characters.
    pub command: String,

    /// The packed size of the layer in bytes.
    pub size: Option<u64>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the history of the chain ending at `tip_id`, newest first.
pub fn history(graph: &ExportGraph, tip_id: &str) -> SquashResult<Vec<HistoryRecord>> {
    let mut chain = graph.chain_to(tip_id)?;
    chain.reverse();

    let records = chain
        .into_iter()
        .map(|layer| {
            let config = layer.get_config();
            HistoryRecord {
                id: utils::truncate_id(layer.id()).to_string(),
                created: config.created,
                command: config.command().chars().take(HISTORY_COMMAND_LEN).collect(),
                size: layer.get_packed_size().or(config.size),
            }
        })
        .collect();

    Ok(records)
}

/// Formats history records as aligned columns, with ages relative to `now`.
pub fn render_history(records: &[HistoryRecord], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<id$}  {:<20}  {:<cmd$}  SIZE",
        "IMAGE",
        "CREATED",
        "CREATED BY",
        id = SHORT_ID_LEN,
        cmd = HISTORY_COMMAND_LEN
    );

    for record in records {
        let created = record
            .created
            .map(|created| format!("{} ago", utils::human_duration(now - created)))
            .unwrap_or_else(|| "unknown".to_string());
        let size = record
            .size
            .map(utils::human_size)
            .unwrap_or_else(|| "-".to_string());

        let _ = writeln!(
            out,
            "{:<id$}  {:<20}  {:<cmd$}  {}",
            record.id,
            created,
            record.command,
            size,
            id = SHORT_ID_LEN,
            cmd = HISTORY_COMMAND_LEN
        );
    }

    out
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
