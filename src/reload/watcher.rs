//! Local-filesystem configuration source.
//!
//! Polls a directory and sends the coordinator the full document set
//! whenever any file's content changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::coordinator::{CoordinatorHandle, Documents};
use crate::error::{Result, ShardlimitError};

/// Watches a directory of rate limit rule files.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    poll_interval: Duration,
}

impl DirectoryWatcher {
    /// Create a watcher, creating `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, poll_interval })
    }

    async fn load(&self) -> Result<Documents> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || read_documents(&dir))
            .await
            .map_err(|e| ShardlimitError::Io(std::io::Error::other(e)))
    }

    /// Send the current documents, then resend whenever they change, until
    /// `shutdown` turns true or its sender is dropped.
    pub async fn run(
        self,
        handle: CoordinatorHandle,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut current = self.load().await?;
        info!(
            dir = %self.dir.display(),
            documents = current.len(),
            "Loaded rate limit rules"
        );
        handle.config_changed(current.clone()).await?;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let documents = self.load().await?;
                    if documents != current {
                        info!(
                            dir = %self.dir.display(),
                            documents = documents.len(),
                            "Rate limit rules changed"
                        );
                        handle.config_changed(documents.clone()).await?;
                        current = documents;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(dir = %self.dir.display(), "Directory watcher stopped");
        Ok(())
    }
}

/// Read rule files under `dir`, keyed by path relative to `dir`.
///
/// Subdirectories are read recursively. Hidden entries, non-regular files
/// and unreadable files are skipped.
pub fn read_documents(dir: &Path) -> Documents {
    let mut documents = Documents::new();

    let walker = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read rules directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        match fs::read(path) {
            Ok(content) => {
                let name = path.strip_prefix(dir).unwrap_or(path);
                documents.insert(name.to_string_lossy().into_owned(), content);
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable file"),
        }
    }

    documents
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
