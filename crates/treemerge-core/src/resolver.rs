//! Resolver interface (§4.6) and the trivial concrete resolvers that don't
//! need a terminal. The interactive implementation lives in the `treemerge`
//! CLI crate, which is the only place terminal I/O belongs.

use std::path::PathBuf;

use crate::model::{Choice, PathRecord, Side, SideData};

/// Everything a Resolver needs to present one conflict to a human (or a
/// policy) and turn it into a [`Choice`].
#[derive(Clone, Debug)]
pub struct Candidate {
    pub rel_path: String,
    pub a: SideData,
    pub b: SideData,
    pub abs_a: PathBuf,
    pub abs_b: PathBuf,
}

impl Candidate {
    #[must_use]
    pub fn from_row(row: &PathRecord, a_root: &std::path::Path, b_root: &std::path::Path) -> Self {
        Self {
            rel_path: row.rel_path.clone(),
            a: row.a.clone(),
            b: row.b.clone(),
            abs_a: a_root.join(&row.rel_path),
            abs_b: b_root.join(&row.rel_path),
        }
    }
}

/// Turns a presented conflict into a decision. Implementations may block —
/// the Broker calls this off the Fingerprinter/Applier hot path, on a
/// dedicated thread, so a slow human never stalls unrelated work.
pub trait Resolver: Send + Sync {
    fn resolve(&self, candidate: &Candidate) -> Choice;
}

/// Always resolves to `prefer_newer`. Useful for unattended runs
/// (`--on-conflict prefer-newer`) and as a default in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysPreferNewerResolver;

impl Resolver for AlwaysPreferNewerResolver {
    fn resolve(&self, _candidate: &Candidate) -> Choice {
        Choice::PreferNewer
    }
}

/// Always resolves to `prefer_older`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysPreferOlderResolver;

impl Resolver for AlwaysPreferOlderResolver {
    fn resolve(&self, _candidate: &Candidate) -> Choice {
        Choice::PreferOlder
    }
}

/// A resolver backed by a fixed, pre-programmed sequence of choices (or a
/// fallback once exhausted). Used by integration tests and property tests
/// that need deterministic, repeatable decisions — e.g. to exercise P4
/// (same decisions -> same final state across a SIGINT/restart).
pub struct ScriptedResolver {
    choices: parking_lot::Mutex<std::collections::VecDeque<Choice>>,
    fallback: Choice,
}

impl ScriptedResolver {
    #[must_use]
    pub fn new(choices: impl IntoIterator<Item = Choice>, fallback: Choice) -> Self {
        Self {
            choices: parking_lot::Mutex::new(choices.into_iter().collect()),
            fallback,
        }
    }
}

impl Resolver for ScriptedResolver {
    fn resolve(&self, _candidate: &Candidate) -> Choice {
        self.choices.lock().pop_front().unwrap_or(self.fallback)
    }
}
