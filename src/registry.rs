use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, anyhow};
use tracing::warn;

use switchyard::Settings;

/// Directory name under the per-user data location; dotted on Unix.
pub const APP_DIR_NAME: &str = "switchyard";
pub const SETTINGS_FILE: &str = "config.json";
pub const LOG_FILE: &str = "switchyard.log";

/// Environment variables tried in order, with the sub-path joined under each.
const WINDOWS_BASES: &[(&str, &[&str])] = &[("APPDATA", &[]), ("USERPROFILE", &["AppData", "Roaming"])];
const UNIX_BASES: &[(&str, &[&str])] = &[("HOME", &[])];

/// Per-user settings directory: `%APPDATA%\switchyard` on Windows
/// (`%USERPROFILE%\AppData\Roaming` when APPDATA is unset), `~/.switchyard` elsewhere.
pub fn config_dir() -> Result<PathBuf> {
    let candidates = if cfg!(windows) { WINDOWS_BASES } else { UNIX_BASES };
    let dir_name = if cfg!(windows) { APP_DIR_NAME.to_string() } else { format!(".{}", APP_DIR_NAME) };

    candidates
        .iter()
        .find_map(|(var, nested)| {
            let base = std::env::var_os(var).filter(|v| !v.is_empty())?;
            let mut dir = PathBuf::from(base);
            dir.extend(nested.iter());
            Some(dir.join(&dir_name))
        })
        .ok_or_else(|| {
            let vars: Vec<&str> = candidates.iter().map(|(var, _)| *var).collect();
            anyhow!("none of {} is set; cannot determine settings directory", vars.join(", "))
        })
}

/// Settings file location: the explicit override, or `config.json` in [`config_dir`].
pub fn settings_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(config_dir()?.join(SETTINGS_FILE)),
    }
}

/// Directory that relative defaults (backups, payloads, log) hang off.
pub fn settings_dir(settings_path: &Path) -> PathBuf {
    settings_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    if content.trim().is_empty() {
        // Treat empty file as defaults
        return Ok(Settings::default());
    }
    match serde_json::from_str::<Settings>(&content) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            warn!("settings file {} is corrupt ({}); using defaults", path.display(), e);
            Ok(Settings::default())
        }
    }
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings)?;
    // Write atomically: write to temp file then rename
    let dir = path.parent().ok_or_else(|| anyhow!("invalid settings path"))?;
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!("{}.tmp", SETTINGS_FILE));
    fs::write(&tmp, json)?;
    // On Windows, replace by removing first if necessary
    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
