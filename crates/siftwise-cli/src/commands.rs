use clap::{Parser, Subcommand, ValueEnum};
use siftwise_core::config::PreserveMode;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sift")]
#[command(about = "Plan and safely apply a reorganization of a messy file collection", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./Sift.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PreserveArg {
    Off,
    On,
    Smart,
}

impl From<PreserveArg> for PreserveMode {
    fn from(arg: PreserveArg) -> Self {
        match arg {
            PreserveArg::Off => PreserveMode::Off,
            PreserveArg::On => PreserveMode::On,
            PreserveArg::Smart => PreserveMode::Smart,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a folder and write a reorganization plan to <dest-root>/.sift
    DraftStructure {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        dest_root: PathBuf,
        /// Keep the source folder layout below each label folder
        #[arg(long, value_enum)]
        preserve: Option<PreserveArg>,
        /// Ignore the user rules file
        #[arg(long)]
        no_rules: bool,
    },
    /// Show the planned tree, preview counts and any artifact problems
    ReviewStructure {
        #[arg(long)]
        dest_root: PathBuf,
    },
    /// Apply the plan through the journal
    Execute {
        #[arg(long)]
        dest_root: PathBuf,
        /// Report what would run without touching any file
        #[arg(long)]
        what_if: bool,
    },
    /// Re-classify residual files until the residual set stops shrinking
    RefineResiduals {
        #[arg(long)]
        dest_root: PathBuf,
        #[arg(long)]
        max_passes: Option<u32>,
    },
    /// Turn suggested entries into real moves or copies
    PromoteSuggested {
        #[arg(long)]
        dest_root: PathBuf,
        /// Only promote entries with this label
        #[arg(long)]
        label: Option<String>,
    },
    /// Reverse every applied operation
    Undo {
        #[arg(long)]
        dest_root: PathBuf,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Print configuration values
    PrintConfig,
}
