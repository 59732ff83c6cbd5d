use indicatif::ProgressBar;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::TreeSyncError;

/// Recursively copy `from` into `to`, overwriting every file that exists in both.
///
/// Returns the number of files copied. Symlinks are followed and their target
/// content is copied. A failure aborts the remaining copies; whatever was
/// already written stays in place.
pub fn overlay(from: &Path, to: &Path) -> Result<u64, TreeSyncError> {
    overlay_excluding(from, to, &[], &ProgressBar::hidden())
}

/// Like [`overlay`], but skips top-level entries of `from` whose name matches
/// one of `exclude_names` (case-insensitive).
pub fn overlay_excluding(
    from: &Path,
    to: &Path,
    exclude_names: &[&str],
    bar: &ProgressBar,
) -> Result<u64, TreeSyncError> {
    if !from.is_dir() {
        return Err(TreeSyncError::io(
            "read source",
            from,
            io::Error::new(io::ErrorKind::NotFound, "source directory not found"),
        ));
    }
    fs::create_dir_all(to).map_err(|e| TreeSyncError::io("create", to, e))?;

    let should_include = |e: &walkdir::DirEntry| {
        if e.depth() != 1 {
            return true;
        }
        let name = match e.file_name().to_str() { Some(n) => n, None => return true };
        !exclude_names.iter().any(|ex| name.eq_ignore_ascii_case(ex))
    };

    let mut copied = 0;
    for entry in WalkDir::new(from).follow_links(true).into_iter().filter_entry(|e| should_include(e)) {
        let entry = entry.map_err(|source| TreeSyncError::Walk { root: from.to_path_buf(), source })?;
        let path = entry.path();
        let rel = match path.strip_prefix(from) { Ok(r) => r, Err(_) => continue };
        let dest = to.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| TreeSyncError::io("create", &dest, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| TreeSyncError::io("create", parent, e))?;
            }
            fs::copy(path, &dest).map_err(|e| TreeSyncError::io("copy", path, e))?;
            copied += 1;
            bar.inc(1);
        } else {
            return Err(TreeSyncError::UnsupportedEntry(path.to_path_buf()));
        }
    }
    debug!(from = %from.display(), to = %to.display(), copied, "overlay complete");
    Ok(copied)
}

/// Remove a file or a whole directory tree. Returns `false` if nothing was there.
pub fn remove_path(path: &Path) -> io::Result<bool> {
    let md = match fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if md.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}
