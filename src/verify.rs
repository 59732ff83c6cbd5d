use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::ConfigError;
use crate::utils::hash::same_content;
use crate::variants::VariantTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Missing,
    Modified,
    Unreadable(String),
}

/// How far an install root is from a clean activation of one variant.
#[derive(Debug, Clone)]
pub struct VariantStatus {
    pub id: String,
    pub payload_present: bool,
    /// Other variants' exclusive paths still present under the install root.
    pub foreign: Vec<PathBuf>,
    /// Payload files absent from or different in the install root.
    pub drift: Vec<(PathBuf, Drift)>,
}

impl VariantStatus {
    pub fn matches(&self) -> bool {
        self.payload_present && self.foreign.is_empty() && self.drift.is_empty()
    }
}

pub fn inspect(table: &VariantTable, install_root: &Path, variant_id: &str) -> Result<VariantStatus, ConfigError> {
    let spec = table.resolve(variant_id)?;
    let foreign = table
        .exclusions_for(variant_id)?
        .into_iter()
        .filter(|p| install_root.join(p).symlink_metadata().is_ok())
        .collect();

    let payload_present = spec.overlay_path.is_dir();
    let mut drift = Vec::new();
    if payload_present {
        for entry in WalkDir::new(&spec.overlay_path).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let rel = e
                        .path()
                        .and_then(|p| p.strip_prefix(&spec.overlay_path).ok())
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    drift.push((rel, Drift::Unreadable(e.to_string())));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&spec.overlay_path) { Ok(r) => r, Err(_) => continue };
            let installed = install_root.join(rel);
            if !installed.is_file() {
                drift.push((rel.to_path_buf(), Drift::Missing));
                continue;
            }
            match same_content(entry.path(), &installed) {
                Ok(true) => {}
                Ok(false) => drift.push((rel.to_path_buf(), Drift::Modified)),
                Err(e) => drift.push((rel.to_path_buf(), Drift::Unreadable(e.to_string()))),
            }
        }
    }
    debug!(variant = variant_id, drift = drift.len(), "inspected install root");

    Ok(VariantStatus { id: spec.id.clone(), payload_present, foreign, drift })
}

/// The first variant the install root fully matches, if any.
pub fn detect_active(table: &VariantTable, install_root: &Path) -> Result<Option<String>, ConfigError> {
    for id in table.ids() {
        if inspect(table, install_root, id)?.matches() {
            return Ok(Some(id.to_string()));
        }
    }
    Ok(None)
}
