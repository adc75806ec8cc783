//! Shared helpers for locating command-line speech tools.

use std::path::{Path, PathBuf};

/// Find a binary at an explicit path or in PATH.
///
/// `configured` is checked first; if it is unset or not a file, `name` is
/// looked up on PATH.
pub fn find_binary(name: &str, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        let path = expand_tilde(path);
        if path.is_file() {
            return Some(path);
        }
    }

    which::which(name).ok()
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}
