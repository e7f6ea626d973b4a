//! Home-directory expansion for user-supplied paths.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Expand a leading `~` to the invoking user's home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    expand_tilde_with(path, dirs::home_dir().as_deref())
}

/// Expand a leading `~` against an explicit home directory.
///
/// Only `~` and `~/...` are expanded; `~user/...` and all other paths are
/// returned unchanged. Fails when expansion is needed but `home` is `None`.
pub fn expand_tilde_with(path: &Path, home: Option<&Path>) -> Result<PathBuf> {
    let Some(path_str) = path.to_str() else {
        return Ok(path.to_path_buf());
    };

    let rest = if path_str == "~" {
        ""
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        rest
    } else {
        return Ok(path.to_path_buf());
    };

    let home = home.ok_or_else(|| Error::NoHomeDir(path.to_path_buf()))?;
    Ok(home.join(rest))
}
