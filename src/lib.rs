//! switchyard: switches a shared install directory between mutually exclusive
//! server variants and keeps per-account session snapshots.

pub mod config;
pub mod engine;
pub mod error;
pub mod launch;
pub mod process;
pub mod storage;
pub mod utils;
pub mod variants;
pub mod verify;

pub use config::{EngineConfig, Settings, SnapshotMeta, VariantSpec};
pub use engine::{SwitchEngine, SwitchResult, SwitchState};
pub use error::{ConfigError, FailureCause, LaunchError, PathFailure, SnapshotError, SwitchError};
pub use process::{ProcessGuard, StopReport, SystemProcessGuard};
pub use storage::{NO_OVERRIDE, Snapshot, SnapshotStore};
pub use variants::VariantTable;
