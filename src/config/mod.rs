pub mod switchyard;

pub use switchyard::{EngineConfig, Settings, SnapshotMeta, VariantSpec};
