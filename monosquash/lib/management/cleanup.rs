//! Removing the working directory when a run ends or is interrupted.

use std::path::{Path, PathBuf};

use tokio::{
    signal::unix::{signal, Signal, SignalKind},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{utils, SquashResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The exit status used when a run is interrupted.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A task that removes the working directory once the run ends or the process is interrupted.
///
/// On SIGINT or SIGTERM the directory is removed and the process exits with
/// [`INTERRUPTED_EXIT_CODE`]. Otherwise the directory is removed when [`finish`] is called.
///
/// [`finish`]: CleanupWatcher::finish
#[derive(Debug)]
pub struct CleanupWatcher {
    token: CancellationToken,
    handle: JoinHandle<SquashResult<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CleanupWatcher {
    /// Starts watching. Signal handlers are installed before this returns.
    pub fn spawn(work_dir: impl Into<PathBuf>) -> SquashResult<Self> {
        let work_dir = work_dir.into();
        let sigint = signal(SignalKind::interrupt())?;
        let sigterm = signal(SignalKind::terminate())?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(watch(work_dir, token.clone(), sigint, sigterm));

        Ok(Self { token, handle })
    }

    /// Removes the working directory and waits for the watcher to stop.
    pub async fn finish(self) -> SquashResult<()> {
        self.token.cancel();
        self.handle.await?
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn watch(
    work_dir: PathBuf,
    token: CancellationToken,
    mut sigint: Signal,
    mut sigterm: Signal,
) -> SquashResult<()> {
    tokio::select! {
        _ = token.cancelled() => {
            remove_work_dir(&work_dir).await
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT signal");
            interrupted(&work_dir).await
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM signal");
            interrupted(&work_dir).await
        }
    }
}

async fn interrupted(work_dir: &Path) -> SquashResult<()> {
    if let Err(e) = remove_work_dir(work_dir).await {
        tracing::error!("failed to remove {}: {e}", work_dir.display());
    }

    std::process::exit(INTERRUPTED_EXIT_CODE);
}

async fn remove_work_dir(work_dir: &Path) -> SquashResult<()> {
    tracing::debug!("removing working directory {}", work_dir.display());
    let work_dir = work_dir.to_path_buf();
    tokio::task::spawn_blocking(move || utils::remove_tree(work_dir)).await?
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_cleanup_watcher_removes_work_dir_on_finish() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let work_dir = temp.path().join("monosquash-run");
        tokio::fs::create_dir_all(work_dir.join("layer/etc")).await?;
        tokio::fs::write(work_dir.join("layer/etc/os"), "linux").await?;

        let watcher = CleanupWatcher::spawn(&work_dir)?;
        assert!(work_dir.exists());

        watcher.finish().await?;
        assert!(!work_dir.exists());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_cleanup_watcher_tolerates_missing_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let work_dir = temp.path().join("never-created");

        let watcher = CleanupWatcher::spawn(&work_dir)?;
        watcher.finish().await?;
        assert!(!work_dir.exists());

        Ok(())
    }
}
