//! Storage file discovery under a data root.

use crate::error::{Result, TsmError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Returns every file under `root` whose extension is `extension`.
///
/// The walk is recursive and the result is sorted so runs are repeatable.
/// Symlinked directories are not descended into. `extension` is matched
/// without its leading dot.
///
/// # Errors
///
/// Returns `TsmError::Open` if `root` or one of its subdirectories cannot
/// be read.
pub fn discover_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let extension = extension.trim_start_matches('.');
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let open_err = |source| TsmError::Open {
            path: dir.clone(),
            source,
        };
        for entry in fs::read_dir(&dir).map_err(open_err)? {
            let entry = entry.map_err(open_err)?;
            let path = entry.path();
            if entry.file_type().map_err(open_err)?.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == extension) {
                trace!("found {}", path.display());
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
