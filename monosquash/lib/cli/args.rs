use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{RepoTag, SquashOptions, StartPoint},
    SquashResult,
};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// monosquash - Collapse the layers of a saved container image into one
#[derive(Debug, Parser)]
#[command(name = "monosquash", author, about, disable_version_flag = true, styles=styles::styles())]
pub struct MonosquashArgs {
    /// Read the saved image from this file instead of standard input
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Write the squashed image to this file instead of standard output
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Repository and tag for the squashed image
    #[arg(short, long, value_name = "REPO[:TAG]")]
    pub tag: Option<String>,

    /// Layer to squash from, or `root` to squash the whole image
    #[arg(short, long, value_name = "ID|root")]
    pub from: Option<String>,

    /// Keep the working directory after the run
    #[arg(long)]
    pub keep_temp: bool,

    /// Directory to create the working directory in
    #[arg(long, value_name = "DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Print version and exit
    #[arg(short = 'v', long)]
    pub version: bool,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl MonosquashArgs {
    /// Parses the tag and start point and builds the options for a run.
    pub fn to_options(&self) -> SquashResult<SquashOptions> {
        let tag = self
            .tag
            .as_deref()
            .map(str::parse::<RepoTag>)
            .transpose()?;
        let from = self
            .from
            .as_deref()
            .map(str::parse::<StartPoint>)
            .transpose()?;

        Ok(SquashOptions {
            input: self.input.clone(),
            output: self.output.clone(),
            tmp_dir: self.tmp_dir.clone(),
            tag,
            from,
            keep_temp: self.keep_temp,
        })
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
