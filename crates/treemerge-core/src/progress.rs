//! Progress channel type and small helpers for turning a raw
//! [`ProgressSnapshot`] into something worth printing.
//!
//! The snapshot itself lives in [`crate::model`] since it's pure data the
//! store's counters feed directly; this module is just the channel alias
//! and presentation-adjacent helpers that don't belong in the data model.

use std::sync::mpsc;

use crate::model::ProgressSnapshot;

/// What the Coordinator sends and a renderer (the CLI's `indicatif` bar, a
/// test harness, ...) receives.
pub type ProgressSender = mpsc::Sender<ProgressSnapshot>;
pub type ProgressReceiver = mpsc::Receiver<ProgressSnapshot>;

/// Convenience constructor so callers don't need `mpsc` in scope directly.
#[must_use]
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::channel()
}

impl ProgressSnapshot {
    /// Rows neither applied nor failed yet, out of the total known so far.
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.total_paths.saturating_sub(self.applied + self.failed)
    }

    /// Fraction in `[0.0, 1.0]` of rows that have reached a terminal state.
    /// `0.0` while `total_paths` is still zero (nothing scanned yet).
    #[must_use]
    pub fn fraction_done(&self) -> f64 {
        if self.total_paths == 0 {
            return 0.0;
        }
        (self.applied + self.failed) as f64 / self.total_paths as f64
    }
}
