//! Argument parsing.
//!
//! A single flat command — `treemerge <a> <b> <dest> [flags]` — rather than
//! a subcommand tree, matching the shape of the teacher's leaf commands
//! (`status`, `push`) rather than its multi-level `ws` tree: there's only
//! one thing this binary does.

use std::path::PathBuf;

use clap::Parser;

/// Merge two source trees into a destination tree, resumably.
///
/// Scans both source trees, fingerprints files that might be identical,
/// classifies every path into an action, and applies non-conflicting
/// actions while conflicts go to a resolver (interactive by default).
/// Interrupting the run (Ctrl-C) leaves the destination and the checkpoint
/// database in a consistent, resumable state — run the same command again
/// to pick up where it left off.
#[derive(Parser, Debug)]
#[command(name = "treemerge")]
#[command(version, about)]
pub struct Cli {
    /// First source tree.
    pub source_a: PathBuf,

    /// Second source tree.
    pub source_b: PathBuf,

    /// Destination tree (created if it doesn't exist).
    pub destination: PathBuf,

    /// Checkpoint database path. Defaults to `merge_checkpoint.db` in the
    /// working directory.
    #[arg(long, default_value = "merge_checkpoint.db")]
    pub db: PathBuf,

    /// Optional config file. Defaults to `treemerge.toml` next to the
    /// destination if present, otherwise built-in defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Discard any existing checkpoint for this destination and start
    /// fresh instead of resuming.
    #[arg(long)]
    pub reset: bool,

    /// Worker-pool size for fingerprinting and applying. Defaults to the
    /// physical core count.
    #[arg(long)]
    pub jobs: Option<usize>,

    /// How to resolve conflicts when they arise.
    #[arg(long, value_enum, default_value_t = OnConflict::Interactive)]
    pub on_conflict: OnConflict,

    /// Copy-on-write fast path for identical-filesystem copies.
    #[arg(long, value_enum, default_value_t = ReflinkArg::Never)]
    pub reflink: ReflinkArg,

    /// Verbose logging (`-v` info, `-vv` debug). Overridden by `RUST_LOG`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OnConflict {
    Interactive,
    PreferNewer,
    PreferOlder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ReflinkArg {
    Auto,
    Never,
}

impl From<ReflinkArg> for treemerge_core::applier::ReflinkMode {
    fn from(r: ReflinkArg) -> Self {
        match r {
            ReflinkArg::Auto => Self::Auto,
            ReflinkArg::Never => Self::Never,
        }
    }
}
