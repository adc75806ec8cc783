//! Paths that must be removed once a request is finished with them.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::debug;

/// Ordered set of temporary paths owned by one request.
///
/// Paths are removed exactly once: either by [`discharge`](Self::discharge)
/// after the request completes, or on drop if the owner goes away first
/// (early return, panic, cancelled task). Removal is best-effort; failures
/// are logged at debug level and otherwise ignored.
#[derive(Debug, Default)]
pub struct CleanupObligations {
    paths: Vec<PathBuf>,
}

impl CleanupObligations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file or directory. Directories are removed recursively.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Take over another set's obligations.
    pub fn absorb(&mut self, mut other: CleanupObligations) {
        self.paths.append(&mut other.paths);
    }

    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Remove every registered path, in registration order.
    pub async fn discharge(mut self) {
        for path in std::mem::take(&mut self.paths) {
            let result = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            log_failure(&path, result);
        }
    }
}

impl Drop for CleanupObligations {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            let result = match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => std::fs::remove_file(&path),
                Err(e) => Err(e),
            };
            log_failure(&path, result);
        }
    }
}

fn log_failure(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => {},
        Err(e) if e.kind() == ErrorKind::NotFound => {},
        Err(e) => debug!(path = %path.display(), error = %e, "cleanup failed"),
    }
}
