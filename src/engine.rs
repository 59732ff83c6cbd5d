//! Variant switching.
//!
//! A switch runs `Stopping → CleaningExclusions → ApplyingVariant →
//! ApplyingSnapshot → Done` on the calling thread. Cleanup always precedes
//! the payload overlay so that stale artifacts of other variants are gone
//! before the new payload lands. There is no rollback; re-running the same
//! switch converges to the same install state.

use std::fmt;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{ConfigError, FailureCause, PathFailure, SwitchError};
use crate::process::{ProcessGuard, StopReport, SystemProcessGuard};
use crate::storage::{NO_OVERRIDE, SnapshotStore, check_install_root};
use crate::utils::io::{overlay_excluding, remove_path};
use crate::variants::{VariantTable, check_session_dirs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Stopping,
    CleaningExclusions,
    ApplyingVariant,
    ApplyingSnapshot,
    Done { success: bool },
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Stopping => "stopping running instance",
            Self::CleaningExclusions => "removing other variants' files",
            Self::ApplyingVariant => "applying variant payload",
            Self::ApplyingSnapshot => "restoring snapshot",
            Self::Done { success: true } => "done",
            Self::Done { success: false } => "failed",
        };
        f.write_str(s)
    }
}

/// What a switch did. Non-fatal problems are collected in `errors`.
#[derive(Debug)]
pub struct SwitchResult {
    pub applied_variant: String,
    pub snapshot_applied: Option<String>,
    pub errors: Vec<PathFailure>,
    pub stop: StopReport,
    pub files_copied: u64,
    /// States visited, in order.
    pub states: Vec<SwitchState>,
}

impl SwitchResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct SwitchEngine {
    install_root: PathBuf,
    process_name: String,
    session_dirs: Vec<PathBuf>,
    variants: VariantTable,
    snapshots: SnapshotStore,
    guard: Box<dyn ProcessGuard>,
    bar: ProgressBar,
}

impl SwitchEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_guard(config, Box::new(SystemProcessGuard))
    }

    pub fn with_guard(config: EngineConfig, guard: Box<dyn ProcessGuard>) -> Result<Self, ConfigError> {
        check_session_dirs(&config.session_dirs)?;
        Ok(Self {
            variants: VariantTable::new(config.variants)?,
            install_root: config.game_path,
            process_name: config.process_name,
            session_dirs: config.session_dirs,
            snapshots: SnapshotStore::new(config.backup_root),
            guard,
            bar: ProgressBar::hidden(),
        })
    }

    /// Report stage changes and copy progress on `bar`.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn variants(&self) -> &VariantTable {
        &self.variants
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn session_dirs(&self) -> &[PathBuf] {
        &self.session_dirs
    }

    /// Reconcile the install root with `variant_id`, then optionally restore
    /// `snapshot`. Configuration problems fail before anything is touched;
    /// a missing or failing payload aborts after cleanup.
    pub fn apply_variant(&self, variant_id: &str, snapshot: Option<&str>) -> Result<SwitchResult, SwitchError> {
        check_install_root(&self.install_root)?;
        let spec = self.variants.resolve(variant_id)?;
        let exclusions = self.variants.exclusions_for(variant_id)?;
        self.variants.check_payload_disjoint(variant_id)?;

        let mut result = SwitchResult {
            applied_variant: spec.id.clone(),
            snapshot_applied: None,
            errors: Vec::new(),
            stop: StopReport::default(),
            files_copied: 0,
            states: vec![SwitchState::Idle],
        };

        self.enter(&mut result, SwitchState::Stopping);
        result.stop = self.guard.stop(&self.process_name);

        self.enter(&mut result, SwitchState::CleaningExclusions);
        for rel in &exclusions {
            self.remove_recorded(rel, &mut result.errors);
        }

        self.enter(&mut result, SwitchState::ApplyingVariant);
        if !spec.overlay_path.is_dir() {
            self.enter(&mut result, SwitchState::Done { success: false });
            return Err(SwitchError::PayloadMissing {
                variant: spec.id.clone(),
                path: spec.overlay_path.clone(),
                cleanup: result.errors,
            });
        }
        match overlay_excluding(&spec.overlay_path, &self.install_root, &[], &self.bar) {
            Ok(n) => result.files_copied += n,
            Err(source) => {
                self.enter(&mut result, SwitchState::Done { success: false });
                return Err(SwitchError::Overlay {
                    variant: spec.id.clone(),
                    cleanup: result.errors,
                    source,
                });
            }
        }

        if let Some(name) = snapshot.filter(|n| !n.is_empty() && *n != NO_OVERRIDE) {
            self.enter(&mut result, SwitchState::ApplyingSnapshot);
            self.apply_snapshot(name, &mut result);
        }

        self.enter(&mut result, SwitchState::Done { success: true });
        info!(
            variant = %result.applied_variant,
            snapshot = result.snapshot_applied.as_deref().unwrap_or(NO_OVERRIDE),
            warnings = result.errors.len(),
            "switch complete"
        );
        Ok(result)
    }

    /// Drop saved login state and re-apply `variant_id`'s payload.
    /// Every failure here is recorded rather than raised.
    pub fn reset_session(&self, variant_id: &str) -> Result<SwitchResult, SwitchError> {
        check_install_root(&self.install_root)?;
        let spec = self.variants.resolve(variant_id)?;

        let mut result = SwitchResult {
            applied_variant: spec.id.clone(),
            snapshot_applied: None,
            errors: Vec::new(),
            stop: StopReport::default(),
            files_copied: 0,
            states: vec![SwitchState::Idle],
        };

        self.enter(&mut result, SwitchState::Stopping);
        result.stop = self.guard.stop(&self.process_name);

        self.enter(&mut result, SwitchState::CleaningExclusions);
        for rel in &self.session_dirs {
            self.remove_recorded(rel, &mut result.errors);
        }

        self.enter(&mut result, SwitchState::ApplyingVariant);
        if spec.overlay_path.is_dir() {
            match overlay_excluding(&spec.overlay_path, &self.install_root, &[], &self.bar) {
                Ok(n) => result.files_copied += n,
                Err(e) => result
                    .errors
                    .push(PathFailure::new(&spec.overlay_path, FailureCause::PayloadOverlay(e))),
            }
        } else {
            warn!(path = %spec.overlay_path.display(), "payload missing; session reset without reapply");
            result
                .errors
                .push(PathFailure::new(&spec.overlay_path, FailureCause::PayloadMissing));
        }

        self.enter(&mut result, SwitchState::Done { success: true });
        Ok(result)
    }

    fn apply_snapshot(&self, name: &str, result: &mut SwitchResult) {
        let path = self.snapshots.path_for(name);
        let Some(snap) = self.snapshots.get(name) else {
            warn!(snapshot = name, "selected snapshot not found; continuing without it");
            result.errors.push(PathFailure::new(path, FailureCause::SnapshotMissing));
            return;
        };
        if !snap.applies_to(&result.applied_variant) {
            let tagged = snap.variant.unwrap_or_default();
            warn!(
                snapshot = name,
                %tagged,
                variant = %result.applied_variant,
                "snapshot belongs to another variant; not restored"
            );
            let requested = result.applied_variant.clone();
            result
                .errors
                .push(PathFailure::new(path, FailureCause::SnapshotVariantMismatch { tagged, requested }));
            return;
        }
        match self.snapshots.restore(name, &self.install_root) {
            Ok(n) => {
                result.files_copied += n;
                result.snapshot_applied = Some(name.to_string());
            }
            Err(e) => {
                warn!(snapshot = name, "snapshot restore failed: {}", e);
                result.errors.push(PathFailure::new(path, FailureCause::SnapshotOverlay(e)));
            }
        }
    }

    fn remove_recorded(&self, rel: &Path, errors: &mut Vec<PathFailure>) {
        let target = self.install_root.join(rel);
        match remove_path(&target) {
            Ok(true) => info!(path = %target.display(), "removed"),
            Ok(false) => debug!(path = %target.display(), "not present"),
            Err(e) => {
                warn!(path = %target.display(), "remove failed: {}", e);
                errors.push(PathFailure::new(target, FailureCause::Remove(e)));
            }
        }
    }

    fn enter(&self, result: &mut SwitchResult, state: SwitchState) {
        debug!(%state, "switch state");
        self.bar.set_message(state.to_string());
        result.states.push(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariantSpec;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default, Clone)]
    struct FakeGuard {
        calls: Arc<Mutex<Vec<String>>>,
        deny: bool,
    }

    impl ProcessGuard for FakeGuard {
        fn stop(&self, process_name: &str) -> StopReport {
            self.calls.lock().unwrap().push(process_name.to_string());
            if self.deny {
                StopReport { terminated: vec![], denied: vec![42] }
            } else {
                StopReport::default()
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        game: PathBuf,
        guard: FakeGuard,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let game = dir.path().join("game");
            let payloads = dir.path().join("payloads");
            write(&game.join("Arknights.exe"), "exe");
            write(&game.join("hgsdk.dll"), "official sdk (old)");
            write(&game.join("PCGameSDK.dll"), "bili sdk");
            write(&game.join("BLPlatform64/platform.dll"), "bili platform");
            write(&game.join("U8Data/token.dat"), "live token");
            write(&payloads.join("Payload/hgsdk.dll"), "official sdk");
            write(&payloads.join("Payload/config/channel.json"), "{\"channel\":1}");
            write(&payloads.join("Payload_B/PCGameSDK.dll"), "bili sdk v2");
            write(&payloads.join("Payload_B/BLPlatform64/platform.dll"), "bili platform v2");
            write(&payloads.join("Payload_B/config/channel.json"), "{\"channel\":2}");
            Self { dir, game, guard: FakeGuard::default() }
        }

        fn config(&self) -> EngineConfig {
            let payloads = self.dir.path().join("payloads");
            EngineConfig {
                game_path: self.game.clone(),
                backup_root: self.dir.path().join("backups"),
                process_name: "Arknights.exe".into(),
                executable: "Arknights.exe".into(),
                session_dirs: vec![PathBuf::from("U8Data"), PathBuf::from("sdkdata")],
                variants: vec![
                    VariantSpec::new("official", payloads.join("Payload"), ["hgsdk.dll"]),
                    VariantSpec::new(
                        "bilibili",
                        payloads.join("Payload_B"),
                        ["PCGameSDK.dll", "BLPlatform64"],
                    ),
                ],
            }
        }

        fn engine(&self) -> SwitchEngine {
            SwitchEngine::with_guard(self.config(), Box::new(self.guard.clone())).unwrap()
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn official_switch_removes_bilibili_files_and_applies_payload() {
        let fx = Fixture::new();
        let result = fx.engine().apply_variant("official", None).unwrap();

        assert!(result.is_clean());
        assert_eq!(result.applied_variant, "official");
        assert!(!fx.game.join("PCGameSDK.dll").exists());
        assert!(!fx.game.join("BLPlatform64").exists());
        assert_eq!(read(&fx.game.join("hgsdk.dll")), "official sdk");
        assert_eq!(read(&fx.game.join("config/channel.json")), "{\"channel\":1}");
        assert_eq!(read(&fx.game.join("U8Data/token.dat")), "live token");
        assert_eq!(*fx.guard.calls.lock().unwrap(), vec!["Arknights.exe".to_string()]);
        assert_eq!(
            result.states,
            vec![
                SwitchState::Idle,
                SwitchState::Stopping,
                SwitchState::CleaningExclusions,
                SwitchState::ApplyingVariant,
                SwitchState::Done { success: true },
            ]
        );
    }

    #[test]
    fn bilibili_switch_removes_official_files() {
        let fx = Fixture::new();
        fx.engine().apply_variant("bilibili", None).unwrap();

        assert!(!fx.game.join("hgsdk.dll").exists());
        assert_eq!(read(&fx.game.join("PCGameSDK.dll")), "bili sdk v2");
        assert_eq!(read(&fx.game.join("BLPlatform64/platform.dll")), "bili platform v2");
    }

    #[test]
    fn switching_back_and_forth_leaves_no_foreign_files() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let cfg = fx.config();
        for target in ["official", "bilibili", "official", "bilibili"] {
            engine.apply_variant(target, None).unwrap();
            for other in cfg.variants.iter().filter(|v| v.id != target) {
                for p in &other.exclusive_paths {
                    assert!(!fx.game.join(p).exists(), "{} present after {target}", p.display());
                }
            }
        }
    }

    #[test]
    fn unknown_variant_touches_nothing() {
        let fx = Fixture::new();
        let err = fx.engine().apply_variant("global", None).unwrap_err();

        assert!(matches!(err, SwitchError::Config(ConfigError::UnknownVariant(_))));
        assert!(fx.guard.calls.lock().unwrap().is_empty());
        assert!(fx.game.join("PCGameSDK.dll").exists());
    }

    #[test]
    fn missing_install_root_is_a_configuration_error() {
        let fx = Fixture::new();
        fs::remove_dir_all(&fx.game).unwrap();
        let err = fx.engine().apply_variant("official", None).unwrap_err();

        assert!(matches!(err, SwitchError::Config(ConfigError::InstallRootMissing(_))));
        assert!(!fx.game.exists());
    }

    #[test]
    fn missing_payload_is_fatal_after_cleanup() {
        let fx = Fixture::new();
        fs::remove_dir_all(fx.dir.path().join("payloads/Payload")).unwrap();
        let err = fx.engine().apply_variant("official", None).unwrap_err();

        assert!(err.is_fatal_payload());
        assert!(matches!(err, SwitchError::PayloadMissing { ref variant, .. } if variant == "official"));
        assert!(!fx.game.join("PCGameSDK.dll").exists());
        assert_eq!(read(&fx.game.join("hgsdk.dll")), "official sdk (old)");
        assert!(!fx.game.join("config").exists());
    }

    #[test]
    fn snapshot_is_restored_after_payload() {
        let fx = Fixture::new();
        let engine = fx.engine();
        engine
            .snapshots()
            .save("alt", "official", &fx.game, engine.session_dirs())
            .unwrap();
        write(&fx.game.join("U8Data/token.dat"), "other token");

        let result = engine.apply_variant("official", Some("alt")).unwrap();

        assert!(result.is_clean());
        assert_eq!(result.snapshot_applied.as_deref(), Some("alt"));
        assert_eq!(read(&fx.game.join("U8Data/token.dat")), "live token");
        assert!(!fx.game.join("meta.json").exists());
        assert!(result.states.contains(&SwitchState::ApplyingSnapshot));
    }

    #[test]
    fn stale_snapshot_is_recorded_not_fatal() {
        let fx = Fixture::new();
        let result = fx.engine().apply_variant("official", Some("gone")).unwrap();

        assert_eq!(result.snapshot_applied, None);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0].cause, FailureCause::SnapshotMissing));
        assert_eq!(read(&fx.game.join("hgsdk.dll")), "official sdk");
    }

    #[test]
    fn snapshot_of_another_variant_is_not_restored() {
        let fx = Fixture::new();
        let engine = fx.engine();
        engine
            .snapshots()
            .save("bili-acc", "bilibili", &fx.game, engine.session_dirs())
            .unwrap();
        write(&fx.game.join("U8Data/token.dat"), "official token");

        let result = engine.apply_variant("official", Some("bili-acc")).unwrap();

        assert_eq!(result.snapshot_applied, None);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            &result.errors[0].cause,
            FailureCause::SnapshotVariantMismatch { tagged, requested }
                if tagged == "bilibili" && requested == "official"
        ));
        assert_eq!(read(&fx.game.join("U8Data/token.dat")), "official token");
        assert_eq!(read(&fx.game.join("hgsdk.dll")), "official sdk");
    }

    #[test]
    fn untagged_snapshot_applies_to_any_variant() {
        let fx = Fixture::new();
        let engine = fx.engine();
        write(&fx.dir.path().join("backups/legacy/U8Data/token.dat"), "legacy token");

        let result = engine.apply_variant("bilibili", Some("legacy")).unwrap();

        assert!(result.is_clean());
        assert_eq!(result.snapshot_applied.as_deref(), Some("legacy"));
        assert_eq!(read(&fx.game.join("U8Data/token.dat")), "legacy token");
    }

    #[test]
    fn unsafe_session_dir_is_rejected_at_construction() {
        let fx = Fixture::new();
        let outside = fx.dir.path().join("outside");
        write(&outside.join("keep.txt"), "keep");

        for bad in [outside.clone(), PathBuf::from("../outside"), PathBuf::new()] {
            let mut cfg = fx.config();
            cfg.session_dirs.push(bad);
            let err = SwitchEngine::with_guard(cfg, Box::new(fx.guard.clone())).err().unwrap();
            assert!(matches!(err, ConfigError::UnsafeSessionDir(_)));
        }
        assert_eq!(read(&outside.join("keep.txt")), "keep");
        assert!(fx.guard.calls.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failed_exclusion_removal_is_recorded_and_switch_continues() {
        let fx = Fixture::new();
        // `a` is a plain file, so removing `a/b` fails with "not a directory".
        write(&fx.game.join("a"), "plain file");
        let mut cfg = fx.config();
        cfg.variants[1] = VariantSpec::new(
            "bilibili",
            fx.dir.path().join("payloads/Payload_B"),
            ["a/b", "PCGameSDK.dll", "BLPlatform64"],
        );
        let engine = SwitchEngine::with_guard(cfg, Box::new(fx.guard.clone())).unwrap();

        let result = engine.apply_variant("official", None).unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, fx.game.join("a/b"));
        assert!(matches!(result.errors[0].cause, FailureCause::Remove(_)));
        assert!(!fx.game.join("PCGameSDK.dll").exists());
        assert!(!fx.game.join("BLPlatform64").exists());
        assert_eq!(read(&fx.game.join("a")), "plain file");
        assert_eq!(read(&fx.game.join("hgsdk.dll")), "official sdk");
        assert_eq!(result.states.last(), Some(&SwitchState::Done { success: true }));
    }

    #[test]
    fn sentinel_snapshot_means_no_override() {
        let fx = Fixture::new();
        let result = fx.engine().apply_variant("official", Some(NO_OVERRIDE)).unwrap();
        assert!(result.is_clean());
        assert!(!result.states.contains(&SwitchState::ApplyingSnapshot));
    }

    #[test]
    fn denied_termination_is_reported_and_ignored() {
        let mut fx = Fixture::new();
        fx.guard.deny = true;
        let result = fx.engine().apply_variant("official", None).unwrap();

        assert_eq!(result.stop.denied, vec![42]);
        assert!(result.is_clean());
    }

    #[test]
    fn reapplying_is_idempotent() {
        let fx = Fixture::new();
        let engine = fx.engine();
        engine.apply_variant("bilibili", None).unwrap();
        let first = listing(&fx.game);
        engine.apply_variant("bilibili", None).unwrap();
        assert_eq!(first, listing(&fx.game));
    }

    #[test]
    fn reset_session_clears_login_state() {
        let fx = Fixture::new();
        let result = fx.engine().reset_session("official").unwrap();

        assert!(result.is_clean());
        assert!(!fx.game.join("U8Data").exists());
        assert_eq!(read(&fx.game.join("hgsdk.dll")), "official sdk");
        assert!(fx.game.join("PCGameSDK.dll").exists());
    }

    #[test]
    fn reset_session_without_payload_records_error() {
        let fx = Fixture::new();
        fs::remove_dir_all(fx.dir.path().join("payloads/Payload")).unwrap();
        let result = fx.engine().reset_session("official").unwrap();

        assert!(!fx.game.join("U8Data").exists());
        assert!(matches!(result.errors[0].cause, FailureCause::PayloadMissing));
    }

    fn listing(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut out: Vec<_> = walkdir::WalkDir::new(root)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.path().to_path_buf(), fs::read(e.path()).unwrap()))
            .collect();
        out.sort();
        out
    }
}
