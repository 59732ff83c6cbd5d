use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// switchyard: switch a shared game install between server variants
#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about = "Switch an install directory between server variants and manage account snapshots.", long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Settings file (defaults to config.json in the per-user settings directory)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Log debug detail to stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record the game install directory (and optional backup/payload roots, MAA path)
    Init {
        /// Existing game install directory
        game_path: PathBuf,
        /// Where account snapshots are kept
        #[arg(long)]
        backup_root: Option<PathBuf>,
        /// Directory holding the variant payloads
        #[arg(long)]
        payload_root: Option<PathBuf>,
        /// MAA executable started by `switchyard maa`
        #[arg(long)]
        maa_path: Option<PathBuf>,
    },

    /// Stop the game, switch the install to a variant, optionally restore a snapshot
    Switch {
        /// Variant id (e.g. official, bilibili)
        variant: String,
        /// Snapshot to restore after the payload ("none" for no override)
        #[arg(short = 's', long = "snapshot")]
        snapshot: Option<String>,
        /// Start the game after a successful switch
        #[arg(long)]
        launch: bool,
        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Manage account snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommands),

    /// Clear saved login state and re-apply the current variant's payload
    Reset {
        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Start the MAA helper from its own directory
    Maa,

    /// Show which variant the install directory currently matches
    Status,

    /// List configured variants
    Variants,

    /// Print CLI version
    Version,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommands {
    /// Capture the current session state under a name
    Save {
        name: String,
        /// Tag the snapshot with this variant (defaults to the last switched variant)
        #[arg(long)]
        variant: Option<String>,
        /// Overwrite an existing snapshot without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List snapshots usable with a variant
    List {
        /// Variant to filter by (defaults to the last switched variant)
        #[arg(long)]
        variant: Option<String>,
    },

    /// Delete a snapshot
    Delete {
        name: String,
        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
}
