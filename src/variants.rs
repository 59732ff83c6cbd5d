use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::config::VariantSpec;
use crate::error::ConfigError;

/// The static table of supported variants, validated once at construction.
#[derive(Debug, Clone)]
pub struct VariantTable {
    variants: Vec<VariantSpec>,
}

impl VariantTable {
    pub fn new(variants: Vec<VariantSpec>) -> Result<Self, ConfigError> {
        if variants.is_empty() {
            return Err(ConfigError::NoVariants);
        }
        let mut seen = HashSet::new();
        for v in &variants {
            if v.id.trim().is_empty() {
                return Err(ConfigError::EmptyVariantId);
            }
            if !seen.insert(v.id.as_str()) {
                return Err(ConfigError::DuplicateVariant(v.id.clone()));
            }
            if let Some(bad) = v.exclusive_paths.iter().find(|p| !is_contained_relative(p)) {
                return Err(ConfigError::UnsafeExclusivePath {
                    variant: v.id.clone(),
                    path: bad.clone(),
                });
            }
        }
        Ok(Self { variants })
    }

    pub fn resolve(&self, variant_id: &str) -> Result<&VariantSpec, ConfigError> {
        self.variants
            .iter()
            .find(|v| v.id == variant_id)
            .ok_or_else(|| ConfigError::UnknownVariant(variant_id.to_string()))
    }

    /// Every other variant's exclusive paths, in table order, without duplicates.
    ///
    /// The previously active variant is deliberately not tracked, so the
    /// result depends on the target alone.
    pub fn exclusions_for(&self, variant_id: &str) -> Result<Vec<PathBuf>, ConfigError> {
        self.resolve(variant_id)?;
        let mut seen = HashSet::new();
        Ok(self
            .variants
            .iter()
            .filter(|v| v.id != variant_id)
            .flat_map(|v| v.exclusive_paths.iter())
            .filter(|p| seen.insert(p.as_path()))
            .cloned()
            .collect())
    }

    /// Fail if the target's payload ships a path another variant would delete.
    pub fn check_payload_disjoint(&self, variant_id: &str) -> Result<(), ConfigError> {
        let target = self.resolve(variant_id)?;
        for other in self.variants.iter().filter(|v| v.id != variant_id) {
            for path in &other.exclusive_paths {
                if target.overlay_path.join(path).symlink_metadata().is_ok() {
                    return Err(ConfigError::OverlayConflict {
                        owner: other.id.clone(),
                        target: target.id.clone(),
                        path: path.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariantSpec> {
        self.variants.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.id.as_str())
    }
}

/// Only plain relative paths may be deleted from the install root.
/// A non-empty relative path that cannot climb out of the directory it is joined to.
pub(crate) fn is_contained_relative(path: &Path) -> bool {
    let mut normal = 0;
    for c in path.components() {
        match c {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    normal > 0
}

/// Session directories get deleted on reset and copied on save, so they obey
/// the same containment rule as exclusive paths.
pub(crate) fn check_session_dirs(dirs: &[PathBuf]) -> Result<(), ConfigError> {
    match dirs.iter().find(|d| !is_contained_relative(d)) {
        Some(bad) => Err(ConfigError::UnsafeSessionDir(bad.clone())),
        None => Ok(()),
    }
}
