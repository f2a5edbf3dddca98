//! Core data model for the merge engine.
//!
//! Mirrors the Run / `PathRecord` / Action / `ConflictDecision` shapes used
//! throughout the pipeline. Nothing here touches the filesystem or the
//! store — this module is pure data plus the small amount of validation
//! logic attached to it.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which source tree a value or decision came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of filesystem entry recorded for one side of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    File,
    Dir,
    Symlink,
    Absent,
}

impl Kind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "symlink",
            Self::Absent => "absent",
        }
    }

    /// # Errors
    /// Returns an error string if `s` is not one of the four known kinds.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "file" => Ok(Self::File),
            "dir" => Ok(Self::Dir),
            "symlink" => Ok(Self::Symlink),
            "absent" => Ok(Self::Absent),
            other => Err(format!("unknown kind '{other}'")),
        }
    }
}

/// Row lifecycle state (see §4.7 of the design doc — state machine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    AwaitingDecision,
    Ready,
    Applied,
    Failed,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingDecision => "awaiting_decision",
            Self::Ready => "ready",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }

    /// # Errors
    /// Returns an error string for any value that isn't a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting_decision" => Ok(Self::AwaitingDecision),
            "ready" => Ok(Self::Ready),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status '{other}'")),
        }
    }

    /// Rows in these states still have work left to do and are re-offered
    /// to the pipeline on resume.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingDecision | Self::Ready)
    }
}

/// Overall run phase, advanced monotonically by the Coordinator/Scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Scanning,
    Hashing,
    Applying,
    Done,
    Aborted,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Hashing => "hashing",
            Self::Applying => "applying",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    /// # Errors
    /// Returns an error string for any value that isn't a known phase.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "scanning" => Ok(Self::Scanning),
            "hashing" => Ok(Self::Hashing),
            "applying" => Ok(Self::Applying),
            "done" => Ok(Self::Done),
            "aborted" => Ok(Self::Aborted),
            other => Err(format!("unknown phase '{other}'")),
        }
    }
}

/// Action computed by the Classifier for a single path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    CopyFrom(Side),
    Mkdir,
    CreateSymlink { target: String, source: Side },
    Conflict,
}

impl Action {
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::CopyFrom(_) => "copy_from",
            Self::Mkdir => "mkdir",
            Self::CreateSymlink { .. } => "create_symlink",
            Self::Conflict => "conflict",
        }
    }
}

/// A choice offered back from a [`crate::resolver::Resolver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice {
    PreferNewer,
    PreferOlder,
    InspectThenNewer,
    InspectThenOlder,
}

impl Choice {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreferNewer => "prefer_newer",
            Self::PreferOlder => "prefer_older",
            Self::InspectThenNewer => "inspect_then_newer",
            Self::InspectThenOlder => "inspect_then_older",
        }
    }

    /// # Errors
    /// Returns an error string for any value that isn't a known choice.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "prefer_newer" => Ok(Self::PreferNewer),
            "prefer_older" => Ok(Self::PreferOlder),
            "inspect_then_newer" => Ok(Self::InspectThenNewer),
            "inspect_then_older" => Ok(Self::InspectThenOlder),
            other => Err(format!("unknown choice '{other}'")),
        }
    }

    /// Whether this choice prefers the newer (by mtime) candidate.
    #[must_use]
    pub const fn prefers_newer(self) -> bool {
        matches!(self, Self::PreferNewer | Self::InspectThenNewer)
    }
}

/// A recorded conflict decision, also appended verbatim to the
/// append-only `ConflictLog`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDecision {
    pub rel_path: String,
    pub choice: Choice,
    pub winner: Side,
    /// Unix epoch milliseconds.
    pub decided_at: i64,
}

/// Candidate side data, as recorded in a `PathRecord`, used both for
/// classification and for presenting conflicts to a Resolver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SideData {
    pub present: bool,
    pub kind: Option<Kind>,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub hash: Option<u64>,
    pub link_target: Option<String>,
}

impl SideData {
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }
}

/// One row of the merge table: everything known about a single relative
/// path across both source trees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRecord {
    pub rel_path: String,
    pub a: SideData,
    pub b: SideData,
    pub action: Option<Action>,
    pub status: Status,
    pub decision: Option<ConflictDecision>,
    pub error: Option<String>,
}

impl PathRecord {
    #[must_use]
    pub fn new(rel_path: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            a: SideData::absent(),
            b: SideData::absent(),
            action: None,
            status: Status::Pending,
            decision: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn side(&self, side: Side) -> &SideData {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideData {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    /// Invariant I1: at least one side must be present.
    #[must_use]
    pub const fn satisfies_i1(&self) -> bool {
        self.a.present || self.b.present
    }
}

/// A single merge execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Run {
    pub id: String,
    pub a_root: PathBuf,
    pub b_root: PathBuf,
    pub dest_root: PathBuf,
    pub phase: Phase,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub schema_version: i32,
}

/// Whether `begin_run` started a new run or picked up an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Fresh,
    Resumed,
}

/// One entry discovered by a Scanner walk, destined for `Store::upsert_scanned`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedEntry {
    pub rel_path: String,
    pub side: Side,
    pub kind: Kind,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub link_target: Option<String>,
}

/// Snapshot of progress counters, emitted by the Coordinator at a bounded
/// rate for an external display to consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub total_paths: u64,
    pub classified: u64,
    pub awaiting_decision: u64,
    pub applied: u64,
    pub failed: u64,
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [Kind::File, Kind::Dir, Kind::Symlink, Kind::Absent] {
            assert_eq!(Kind::parse(kind.as_str()), Ok(kind));
        }
        assert!(Kind::parse("bogus").is_err());
    }

    #[test]
    fn status_round_trips_and_resumable() {
        for status in [
            Status::Pending,
            Status::AwaitingDecision,
            Status::Ready,
            Status::Applied,
            Status::Failed,
        ] {
            assert_eq!(Status::parse(status.as_str()), Ok(status));
        }
        assert!(Status::Pending.is_resumable());
        assert!(Status::AwaitingDecision.is_resumable());
        assert!(Status::Ready.is_resumable());
        assert!(!Status::Applied.is_resumable());
        assert!(!Status::Failed.is_resumable());
    }

    #[test]
    fn choice_prefers_newer_matches_inspect_variants() {
        assert!(Choice::PreferNewer.prefers_newer());
        assert!(Choice::InspectThenNewer.prefers_newer());
        assert!(!Choice::PreferOlder.prefers_newer());
        assert!(!Choice::InspectThenOlder.prefers_newer());
    }

    #[test]
    fn side_other_is_its_own_inverse() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other(), Side::A);
        assert_eq!(Side::A.other().other(), Side::A);
    }

    #[test]
    fn satisfies_i1_requires_one_present_side() {
        let mut row = PathRecord::new("x/y");
        assert!(!row.satisfies_i1());
        row.a.present = true;
        assert!(row.satisfies_i1());
    }
}
