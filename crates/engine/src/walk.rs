//! Recursive directory scan shared by the description and flow loaders.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::EngineError;

/// Every file below `dir` whose extension is `extension`, sorted by path.
///
/// Symlinks are followed; a directory reached twice (for example through a
/// link back up the tree) is scanned once.
pub fn find_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, EngineError> {
    let meta = fs::metadata(dir).map_err(|e| EngineError::io(dir, e))?;
    if !meta.is_dir() {
        return Err(EngineError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut visited = HashSet::new();
    let mut found = Vec::new();
    visit(dir, extension, &mut visited, &mut found)?;
    found.sort();
    Ok(found)
}

fn visit(
    dir: &Path,
    extension: &str,
    visited: &mut HashSet<PathBuf>,
    found: &mut Vec<PathBuf>,
) -> Result<(), EngineError> {
    let canonical = fs::canonicalize(dir).map_err(|e| EngineError::io(dir, e))?;
    if !visited.insert(canonical) {
        debug!(path = %dir.display(), "directory already visited");
        return Ok(());
    }

    for entry in fs::read_dir(dir).map_err(|e| EngineError::io(dir, e))? {
        let path = entry.map_err(|e| EngineError::io(dir, e))?.path();
        let wanted = path.extension().is_some_and(|ext| ext == extension);
        // `metadata` follows symlinks, so linked files and dirs are handled
        // like the real thing.
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            // A dangling link only matters if it would have been loaded.
            Err(e) if !wanted && fs::symlink_metadata(&path).is_ok() => {
                warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
            Err(e) => return Err(EngineError::io(&path, e)),
        };
        if meta.is_dir() {
            visit(&path, extension, visited, found)?;
        } else if wanted {
            found.push(path);
        }
    }
    Ok(())
}
