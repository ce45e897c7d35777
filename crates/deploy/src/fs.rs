//! File system utils.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::watch;

pub struct FsHandler;

impl FsHandler {
    /// Create the parent directory of `path` if it is missing.
    pub fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
                tracing::debug!("Created directory: {}", parent.display());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Write `content` to `path`, creating parent directories as needed.
    pub fn write_file(path: &Path, content: impl AsRef<[u8]>) -> anyhow::Result<()> {
        Self::ensure_parent_dir(path)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Wait for a file to be created or written, up to `timeout`.
    ///
    /// Returns immediately if the file already exists.
    pub async fn wait_for_file(path: &Path, timeout: Duration) -> anyhow::Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!("File already exists: {}", path.display());
            return Ok(());
        }

        tracing::debug!("Waiting for file: {}", path.display());

        let parent = path
            .parent()
            .context("File path must have a parent directory")?;

        let (tx, mut rx) = watch::channel(false);

        let target: PathBuf = path.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event)
                    if (event.kind.is_create() || event.kind.is_modify())
                        && event.paths.contains(&target) =>
                {
                    tracing::debug!(path = %target.display(), "File detected");
                    if tx.send(true).is_err() {
                        tracing::trace!(path = %target.display(), "File watcher receiver dropped");
                    }
                }
                Ok(event) => {
                    tracing::trace!(event = ?event, "Ignored file watcher event");
                }
                Err(e) => {
                    tracing::error!(err = ?e, path = %target.display(), "Failed to watch directory");
                }
            })
            .context("Failed to create file watcher")?;

        watcher
            .watch(parent, RecursiveMode::NonRecursive)
            .context("Failed to watch directory")?;

        // The file may have appeared between the existence check and the watch.
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }

        tokio::time::timeout(timeout, async {
            rx.changed()
                .await
                .map_err(|e| anyhow::anyhow!("File watcher channel closed: {}", e))
        })
        .await
        .with_context(|| format!("Timeout waiting for file: {}", path.display()))??;

        // Creation events can fire before the writer has flushed.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(())
    }
}
