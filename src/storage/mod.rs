use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::SnapshotMeta;
use crate::error::{ConfigError, SnapshotError, TreeSyncError};
use crate::utils::io::{overlay, overlay_excluding, remove_path};
use crate::variants::check_session_dirs;

pub const META_FILE: &str = "meta.json";

/// Selection value meaning "apply no snapshot".
pub const NO_OVERRIDE: &str = "none";

/// A named capture of session-state directories.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub name: String,
    /// `None` for legacy, untagged snapshots.
    pub variant: Option<String>,
    pub subdirectories: BTreeSet<PathBuf>,
    pub meta: SnapshotMeta,
    pub path: PathBuf,
}

impl Snapshot {
    pub fn applies_to(&self, variant_id: &str) -> bool {
        self.variant.as_deref().is_none_or(|v| v == variant_id)
    }
}

/// Owns the backup root. Nothing else writes under it.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pure path computation; no I/O.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.path_for(name).is_dir()
    }

    /// Look up one snapshot by name, whatever variant it is tagged with.
    pub fn get(&self, name: &str) -> Option<Snapshot> {
        if !self.exists(name) {
            return None;
        }
        read_snapshot(&self.path_for(name))
    }

    /// Snapshots selectable under `variant_id`: untagged ones plus those tagged
    /// with that variant. Order follows directory enumeration; callers that
    /// need a stable order sort by name. Each call re-reads the backup root.
    pub fn list<'a>(
        &self,
        variant_id: &'a str,
    ) -> Result<impl Iterator<Item = Snapshot> + 'a, SnapshotError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(rd) => Some(rd),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(SnapshotError::Io { action: "read", path: self.root.clone(), source });
            }
        };
        Ok(entries
            .into_iter()
            .flatten()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("skipping unreadable backup entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| read_snapshot(&entry.path()))
            .filter(move |snap| snap.applies_to(variant_id)))
    }

    /// Capture `subdirectories` of `install_root` under `name`, replacing any
    /// existing snapshot of that name. Overwrite confirmation is the caller's job.
    pub fn save(
        &self,
        name: &str,
        variant_id: &str,
        install_root: &Path,
        subdirectories: &[PathBuf],
    ) -> Result<Snapshot, SnapshotError> {
        validate_name(name)?;
        check_session_dirs(subdirectories)?;
        check_install_root(install_root)?;

        let dir = self.path_for(name);
        if remove_path(&dir).map_err(|source| SnapshotError::Io { action: "remove", path: dir.clone(), source })? {
            info!(snapshot = name, "replacing existing snapshot");
        }
        fs::create_dir_all(&dir)
            .map_err(|source| SnapshotError::Io { action: "create", path: dir.clone(), source })?;

        let mut captured = Vec::new();
        for sub in subdirectories {
            let src = install_root.join(sub);
            if !src.is_dir() {
                debug!(subdirectory = %sub.display(), "not present in install root; skipped");
                continue;
            }
            captured.push(sub.clone());
        }

        let meta = SnapshotMeta {
            server: Some(variant_id.to_string()),
            saved_at: Some(chrono::Local::now()),
            subdirectories: captured.clone(),
        };
        let meta_path = dir.join(META_FILE);
        fs::write(&meta_path, serde_json::to_string(&meta)?)
            .map_err(|source| SnapshotError::Io { action: "write", path: meta_path, source })?;

        for sub in &captured {
            overlay(&install_root.join(sub), &dir.join(sub))?;
        }

        info!(snapshot = name, variant = variant_id, dirs = captured.len(), "snapshot saved");
        Ok(Snapshot {
            name: name.to_string(),
            variant: meta.server.clone(),
            subdirectories: captured.into_iter().collect(),
            meta,
            path: dir,
        })
    }

    /// Remove a snapshot. Returns `false` (and logs) if it was already gone.
    pub fn delete(&self, name: &str) -> Result<bool, SnapshotError> {
        validate_name(name)?;
        let dir = self.path_for(name);
        let removed = remove_path(&dir)
            .map_err(|source| SnapshotError::Io { action: "remove", path: dir.clone(), source })?;
        if removed {
            info!(snapshot = name, "snapshot deleted");
        } else {
            warn!(snapshot = name, "snapshot already absent; nothing to delete");
        }
        Ok(removed)
    }

    /// Copy a snapshot's captured directories over `install_root`.
    /// The metadata file stays behind.
    pub fn restore(&self, name: &str, install_root: &Path) -> Result<u64, TreeSyncError> {
        overlay_excluding(
            &self.path_for(name),
            install_root,
            &[META_FILE],
            &indicatif::ProgressBar::hidden(),
        )
    }
}

fn read_snapshot(path: &Path) -> Option<Snapshot> {
    let name = match path.file_name()?.to_str() {
        Some(name) => name.to_string(),
        None => {
            warn!(path = %path.display(), "skipping backup directory with a non-UTF-8 name");
            return None;
        }
    };
    let meta_path = path.join(META_FILE);
    let meta = match fs::read_to_string(&meta_path) {
        Ok(content) => serde_json::from_str::<SnapshotMeta>(&content).unwrap_or_else(|e| {
            warn!(snapshot = %name, "unreadable snapshot metadata, treating as untagged: {}", e);
            SnapshotMeta::default()
        }),
        Err(_) => SnapshotMeta::default(),
    };

    let subdirectories = if meta.subdirectories.is_empty() {
        fs::read_dir(path)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| PathBuf::from(e.file_name()))
            .collect()
    } else {
        meta.subdirectories.iter().cloned().collect()
    };

    Some(Snapshot {
        name,
        variant: meta.server.clone().filter(|s| !s.is_empty()),
        subdirectories,
        meta,
        path: path.to_path_buf(),
    })
}

pub fn validate_name(name: &str) -> Result<(), SnapshotError> {
    if name.trim().is_empty() {
        return Err(SnapshotError::NameRequired);
    }
    if name == NO_OVERRIDE {
        return Err(SnapshotError::ReservedName(name.to_string()));
    }
    let invalid = name == "."
        || name == ".."
        || name.chars().any(|c| matches!(c, '/' | '\\' | ':' | '\0'));
    if invalid {
        return Err(SnapshotError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn check_install_root(root: &Path) -> Result<(), ConfigError> {
    if root.as_os_str().is_empty() {
        return Err(ConfigError::InstallRootUnset);
    }
    match fs::metadata(root) {
        Ok(md) if md.is_dir() => Ok(()),
        Ok(_) => Err(ConfigError::InstallRootNotDir(root.to_path_buf())),
        Err(_) => Err(ConfigError::InstallRootMissing(root.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, SnapshotStore) {
        let dir = TempDir::new().unwrap();
        let game = dir.path().join("game");
        fs::create_dir_all(game.join("U8Data/cache")).unwrap();
        fs::write(game.join("U8Data/token.dat"), "token-a").unwrap();
        fs::write(game.join("U8Data/cache/session.bin"), [0u8, 1, 2, 255]).unwrap();
        fs::write(game.join("Arknights.exe"), "exe").unwrap();
        let store = SnapshotStore::new(dir.path().join("backups"));
        (dir, game, store)
    }

    fn dirs() -> Vec<PathBuf> {
        vec![PathBuf::from("U8Data"), PathBuf::from("sdkdata")]
    }

    fn names(store: &SnapshotStore, variant: &str) -> Vec<String> {
        let mut v: Vec<String> = store.list(variant).unwrap().map(|s| s.name).collect();
        v.sort();
        v
    }

    #[test]
    fn save_captures_present_dirs_and_skips_missing() {
        let (_dir, game, store) = setup();
        let snap = store.save("main", "official", &game, &dirs()).unwrap();

        assert_eq!(snap.subdirectories, BTreeSet::from([PathBuf::from("U8Data")]));
        assert_eq!(
            fs::read_to_string(store.path_for("main").join("U8Data/token.dat")).unwrap(),
            "token-a"
        );
        assert!(!store.path_for("main").join("sdkdata").exists());
        assert!(!store.path_for("main").join("Arknights.exe").exists());

        let meta: SnapshotMeta =
            serde_json::from_str(&fs::read_to_string(store.path_for("main").join(META_FILE)).unwrap())
                .unwrap();
        assert_eq!(meta.server.as_deref(), Some("official"));
    }

    #[test]
    fn save_and_restore_round_trip_byte_for_byte() {
        let (dir, game, store) = setup();
        store.save("main", "official", &game, &dirs()).unwrap();

        let fresh = dir.path().join("fresh");
        fs::create_dir_all(&fresh).unwrap();
        store.restore("main", &fresh).unwrap();

        assert_eq!(fs::read(fresh.join("U8Data/token.dat")).unwrap(), b"token-a");
        assert_eq!(fs::read(fresh.join("U8Data/cache/session.bin")).unwrap(), vec![0u8, 1, 2, 255]);
        assert!(!fresh.join(META_FILE).exists());
    }

    #[test]
    fn save_overwrites_without_merging() {
        let (_dir, game, store) = setup();
        store.save("main", "official", &game, &dirs()).unwrap();
        fs::write(store.path_for("main").join("U8Data/stale.dat"), "stale").unwrap();

        fs::write(game.join("U8Data/token.dat"), "token-b").unwrap();
        store.save("main", "bilibili", &game, &dirs()).unwrap();

        assert!(!store.path_for("main").join("U8Data/stale.dat").exists());
        assert_eq!(
            fs::read_to_string(store.path_for("main").join("U8Data/token.dat")).unwrap(),
            "token-b"
        );
        assert_eq!(names(&store, "official"), Vec::<String>::new());
        assert_eq!(names(&store, "bilibili"), vec!["main".to_string()]);
    }

    #[test]
    fn list_filters_by_variant_and_keeps_legacy_entries() {
        let (_dir, game, store) = setup();
        store.save("a-acc", "official", &game, &dirs()).unwrap();
        store.save("b-acc", "bilibili", &game, &dirs()).unwrap();
        fs::create_dir_all(store.path_for("legacy/U8Data")).unwrap();
        fs::create_dir_all(store.path_for("broken")).unwrap();
        fs::write(store.path_for("broken").join(META_FILE), "not json").unwrap();
        fs::write(store.root().join("stray.txt"), "not a snapshot").unwrap();

        assert_eq!(names(&store, "official"), vec!["a-acc", "broken", "legacy"]);
        assert_eq!(names(&store, "bilibili"), vec!["b-acc", "broken", "legacy"]);

        let legacy = store.list("official").unwrap().find(|s| s.name == "legacy").unwrap();
        assert_eq!(legacy.variant, None);
        assert_eq!(legacy.subdirectories, BTreeSet::from([PathBuf::from("U8Data")]));
    }

    #[test]
    fn list_on_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("missing"));
        assert_eq!(store.list("official").unwrap().count(), 0);
    }

    #[test]
    fn save_rejects_bad_names_and_missing_root() {
        let (dir, game, store) = setup();
        assert!(matches!(store.save("", "official", &game, &dirs()), Err(SnapshotError::NameRequired)));
        assert!(matches!(
            store.save(NO_OVERRIDE, "official", &game, &dirs()),
            Err(SnapshotError::ReservedName(_))
        ));
        assert!(matches!(
            store.save("../escape", "official", &game, &dirs()),
            Err(SnapshotError::InvalidName(_))
        ));
        assert!(matches!(
            store.save("ok", "official", &dir.path().join("nope"), &dirs()),
            Err(SnapshotError::Config(ConfigError::InstallRootMissing(_)))
        ));
        assert!(!store.path_for("ok").exists());
    }

    #[test]
    fn save_refuses_subdirectories_outside_the_install_root() {
        let (dir, game, store) = setup();
        fs::create_dir_all(dir.path().join("outside")).unwrap();
        fs::write(dir.path().join("outside/secret.txt"), "keep out").unwrap();

        for bad in ["../outside", "/etc"] {
            let err = store
                .save("leak", "official", &game, &[PathBuf::from("U8Data"), PathBuf::from(bad)])
                .unwrap_err();
            assert!(matches!(err, SnapshotError::Config(ConfigError::UnsafeSessionDir(_))));
        }
        assert!(!store.path_for("leak").exists());
        assert!(!store.root().exists());
    }

    #[test]
    fn get_finds_snapshots_of_any_variant() {
        let (_dir, game, store) = setup();
        store.save("b-acc", "bilibili", &game, &dirs()).unwrap();

        let snap = store.get("b-acc").unwrap();
        assert_eq!(snap.variant.as_deref(), Some("bilibili"));
        assert!(!snap.applies_to("official"));
        assert!(store.get("missing").is_none());
        assert!(store.get("..").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn list_skips_non_utf8_directory_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_dir, game, store) = setup();
        store.save("main", "official", &game, &dirs()).unwrap();
        let odd = store.root().join(OsStr::from_bytes(b"acc\xff"));
        if fs::create_dir_all(odd.join("U8Data")).is_err() {
            // Some filesystems refuse invalid UTF-8 outright.
            return;
        }

        assert_eq!(names(&store, "official"), vec!["main".to_string()]);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, game, store) = setup();
        store.save("main", "official", &game, &dirs()).unwrap();
        assert!(store.delete("main").unwrap());
        assert!(!store.delete("main").unwrap());
        assert!(!store.exists("main"));
    }
}
