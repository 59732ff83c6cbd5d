use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems with the supplied configuration. Fatal: the operation never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("install root is not configured")]
    InstallRootUnset,
    #[error("install root does not exist: {}", .0.display())]
    InstallRootMissing(PathBuf),
    #[error("install root is not a directory: {}", .0.display())]
    InstallRootNotDir(PathBuf),
    #[error("unknown variant '{0}'")]
    UnknownVariant(String),
    #[error("no variants configured")]
    NoVariants,
    #[error("variant id must not be empty")]
    EmptyVariantId,
    #[error("variant '{0}' is defined more than once")]
    DuplicateVariant(String),
    #[error("variant '{variant}' lists unsafe exclusive path '{}'", .path.display())]
    UnsafeExclusivePath { variant: String, path: PathBuf },
    #[error("session directory '{}' must be a relative path inside the install root", .0.display())]
    UnsafeSessionDir(PathBuf),
    #[error(
        "variant '{owner}' excludes '{}', which is shipped in the payload of '{target}'",
        .path.display()
    )]
    OverlayConflict {
        owner: String,
        target: String,
        path: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum TreeSyncError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to walk {}: {source}", .root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("unsupported entry kind at {}", .0.display())]
    UnsupportedEntry(PathBuf),
}

impl TreeSyncError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot name required")]
    NameRequired,
    #[error("invalid snapshot name '{0}'")]
    InvalidName(String),
    #[error("snapshot name '{0}' is reserved")]
    ReservedName(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write snapshot metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Copy(#[from] TreeSyncError),
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("missing payload for variant '{variant}': {}", .path.display())]
    PayloadMissing {
        variant: String,
        path: PathBuf,
        /// Cleanup failures recorded before the switch was aborted.
        cleanup: Vec<PathFailure>,
    },
    #[error("failed to apply payload for variant '{variant}': {source}")]
    Overlay {
        variant: String,
        cleanup: Vec<PathFailure>,
        #[source]
        source: TreeSyncError,
    },
}

impl SwitchError {
    /// True for failures that stopped the switch after files were touched.
    pub fn is_fatal_payload(&self) -> bool {
        matches!(self, Self::PayloadMissing { .. } | Self::Overlay { .. })
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("executable not found: {}", .0.display())]
    ExecutableMissing(PathBuf),
    #[error("failed to start {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A non-fatal failure tied to one path, surfaced to the user as a warning.
#[derive(Debug)]
pub struct PathFailure {
    pub path: PathBuf,
    pub cause: FailureCause,
}

impl PathFailure {
    pub fn new(path: impl Into<PathBuf>, cause: FailureCause) -> Self {
        Self {
            path: path.into(),
            cause,
        }
    }
}

impl std::fmt::Display for PathFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.cause)
    }
}

#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("remove failed: {0}")]
    Remove(#[source] io::Error),
    #[error("snapshot not found")]
    SnapshotMissing,
    #[error("snapshot belongs to variant '{tagged}', not '{requested}'; skipped")]
    SnapshotVariantMismatch { tagged: String, requested: String },
    #[error("snapshot restore failed: {0}")]
    SnapshotOverlay(#[source] TreeSyncError),
    #[error("payload missing")]
    PayloadMissing,
    #[error("payload overlay failed: {0}")]
    PayloadOverlay(#[source] TreeSyncError),
}
