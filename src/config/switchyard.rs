use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_PROCESS_NAME: &str = "Arknights.exe";
pub const DEFAULT_VARIANT: &str = "official";

/// One supported back-end sharing the install directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub id: String,
    /// Payload tree copied over the install root when this variant is activated.
    pub overlay_path: PathBuf,
    /// Install-root relative paths that only this variant ships.
    #[serde(default)]
    pub exclusive_paths: Vec<PathBuf>,
}

impl VariantSpec {
    pub fn new(
        id: impl Into<String>,
        overlay_path: impl Into<PathBuf>,
        exclusive_paths: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        Self {
            id: id.into(),
            overlay_path: overlay_path.into(),
            exclusive_paths: exclusive_paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Contents of `meta.json` inside a snapshot directory.
///
/// Legacy snapshots have no `server` key and apply to every variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Local>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdirectories: Vec<PathBuf>,
}

/// Everything the engine needs, handed in by whoever loaded the settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub game_path: PathBuf,
    pub backup_root: PathBuf,
    pub process_name: String,
    pub executable: String,
    pub session_dirs: Vec<PathBuf>,
    pub variants: Vec<VariantSpec>,
}

/// Persisted user settings (`config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub game_path: Option<PathBuf>,
    #[serde(default)]
    pub backup_root: Option<PathBuf>,
    #[serde(default)]
    pub payload_root: Option<PathBuf>,
    /// Companion helper (MAA) started by `switchyard maa`.
    #[serde(default)]
    pub maa_path: Option<PathBuf>,
    #[serde(default = "default_process_name")]
    pub process_name: String,
    #[serde(default = "default_process_name")]
    pub executable: String,
    #[serde(default = "default_session_dirs")]
    pub session_dirs: Vec<PathBuf>,
    #[serde(default = "default_variants")]
    pub variants: Vec<VariantSpec>,
    #[serde(default = "default_last_variant")]
    pub last_variant: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            game_path: None,
            backup_root: None,
            payload_root: None,
            maa_path: None,
            process_name: default_process_name(),
            executable: default_process_name(),
            session_dirs: default_session_dirs(),
            variants: default_variants(),
            last_variant: default_last_variant(),
        }
    }
}

impl Settings {
    /// The configured companion executable; an empty string counts as unset.
    pub fn companion(&self) -> Option<&Path> {
        self.maa_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Resolve defaults relative to `settings_dir` and build the engine configuration.
    pub fn engine_config(&self, settings_dir: &Path) -> Result<EngineConfig, ConfigError> {
        let game_path = self
            .game_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::InstallRootUnset)?;
        let payload_root = self
            .payload_root
            .clone()
            .unwrap_or_else(|| settings_dir.join("resources"));
        let backup_root = self
            .backup_root
            .clone()
            .unwrap_or_else(|| settings_dir.join("AccountBackups"));

        let variants = self
            .variants
            .iter()
            .map(|v| VariantSpec {
                overlay_path: payload_root.join(&v.overlay_path),
                ..v.clone()
            })
            .collect();

        Ok(EngineConfig {
            game_path,
            backup_root,
            process_name: self.process_name.clone(),
            executable: self.executable.clone(),
            session_dirs: self.session_dirs.clone(),
            variants,
        })
    }
}

fn default_process_name() -> String {
    DEFAULT_PROCESS_NAME.to_string()
}

fn default_last_variant() -> String {
    DEFAULT_VARIANT.to_string()
}

fn default_session_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("U8Data"), PathBuf::from("sdkdata")]
}

fn default_variants() -> Vec<VariantSpec> {
    vec![
        VariantSpec::new("official", "Payload", ["hgsdk.dll"]),
        VariantSpec::new("bilibili", "Payload_B", ["PCGameSDK.dll", "BLPlatform64"]),
    ]
}
