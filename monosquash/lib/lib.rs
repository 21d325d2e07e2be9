//! `monosquash` collapses the layers of a saved container image into a single layer.
//!
//! # Overview
//!
//! An image saved with `docker save` in the legacy layout is a tar of per-layer directories plus
//! a `repositories` tag index. monosquash reads such an export, picks the layer to squash from,
//! overlays every later layer onto a fresh layer inserted after it and writes back an export of
//! the same shape. Whiteouts are honored while merging and kept whenever they still hide content
//! that lives below the squash point.
//!
//! # Pipeline
//!
//! - **Load**: unpack the export into a working directory and build the layer graph
//! - **Validate**: refuse exports that hold more than one image
//! - **Choose start**: explicit `--from`, else the last squash marker, else the `FROM` boundary
//! - **Squash**: extract, insert a synthetic layer and merge the range into it
//! - **Write**: pack the new layer, update the tag and stream the retained chain
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use monosquash::{config::{RepoTag, SquashOptions}, management};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = SquashOptions::builder()
//!         .input("image.tar")
//!         .output("squashed.tar")
//!         .tag("myrepo:stable".parse::<RepoTag>()?)
//!         .build();
//!
//!     let outcome = management::squash::squash_image(&options).await?;
//!     println!("squashed into {}", outcome.get_layer_id());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`archive`] - Extracting and packing layer archives
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Run options, tags and start points
//! - [`export`] - The layer graph of an unpacked export
//! - [`image`] - Tagging, serialization and history
//! - [`management`] - The end-to-end squash pipeline
//! - [`squash`] - Layer merging with whiteout handling
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod archive;
pub mod cli;
pub mod config;
pub mod export;
pub mod image;
pub mod management;
pub mod squash;
pub mod utils;

pub use error::*;
