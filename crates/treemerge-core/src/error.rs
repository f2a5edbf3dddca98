//! Error types for the merge engine.
//!
//! Follows the error-kinds split from §7 of the design doc: most errors are
//! per-row and non-fatal (captured into the row's `error` field by the
//! worker that hit them); a small set are fatal and tear down the whole
//! run. Each variant is self-contained and carries enough context to act
//! on without digging through logs.

use std::fmt;
use std::path::PathBuf;

/// Fatal errors that abort the run. Returned up through the Coordinator.
#[derive(Debug)]
pub enum CoreError {
    /// The store is unusable (I/O failure, corruption, lock poisoned).
    StoreUnavailable { detail: String },

    /// The on-disk schema version doesn't match what this binary expects.
    SchemaVersionMismatch { found: i32, expected: i32 },

    /// `--db` points at a store whose source/destination roots differ from
    /// the ones given on the command line, and `--reset` wasn't passed.
    RootMismatch {
        db_path: PathBuf,
        recorded_a: PathBuf,
        recorded_b: PathBuf,
        recorded_dest: PathBuf,
    },

    /// The destination ran out of space or became read-only mid-run, and
    /// the one confirmation retry also failed.
    DestinationFatal { detail: String },

    /// A usage error: bad arguments, missing paths, etc.
    Usage { detail: String },

    /// The resolver was interrupted (e.g. Ctrl-C during a prompt). Treated
    /// as a request for graceful shutdown, not a hard failure.
    ResolverAborted,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreUnavailable { detail } => write!(f, "store unavailable: {detail}"),
            Self::SchemaVersionMismatch { found, expected } => write!(
                f,
                "store schema version {found} does not match expected {expected}; \
                 re-run with --reset to discard the existing store"
            ),
            Self::RootMismatch {
                db_path,
                recorded_a,
                recorded_b,
                recorded_dest,
            } => write!(
                f,
                "{} was created for a different merge ({} + {} -> {}); \
                 pass --reset to discard it, or point --db elsewhere",
                db_path.display(),
                recorded_a.display(),
                recorded_b.display(),
                recorded_dest.display()
            ),
            Self::DestinationFatal { detail } => write!(f, "destination error: {detail}"),
            Self::Usage { detail } => write!(f, "{detail}"),
            Self::ResolverAborted => write!(f, "resolver aborted; shutting down"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StoreUnavailable {
            detail: e.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::StoreUnavailable {
            detail: e.to_string(),
        }
    }
}

/// A per-row error, non-fatal to the run as a whole. Stored in
/// `PathRecord::error` and surfaced in the end-of-run summary.
#[derive(Debug, Clone)]
pub enum RowError {
    SourceIo { detail: String },
    DestinationIo { detail: String },
    HashMismatchOnResume { detail: String },
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceIo { detail } => write!(f, "source I/O error: {detail}"),
            Self::DestinationIo { detail } => write!(f, "destination I/O error: {detail}"),
            Self::HashMismatchOnResume { detail } => {
                write!(f, "destination content diverged from recorded hash: {detail}")
            }
        }
    }
}

impl std::error::Error for RowError {}

pub type CoreResult<T> = Result<T, CoreError>;
