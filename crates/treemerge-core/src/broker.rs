//! Conflict Broker: serves `awaiting_decision` rows to a Resolver in
//! arrival order and absorbs decisions, without ever gating the
//! Fingerprinter or Classifier from making progress on unrelated paths.
//!
//! The store is the queue of record (`awaiting_seq` orders rows by when
//! they entered `awaiting_decision`); this module only adds the
//! blocking-wait and wake-on-new-arrival behavior that callers want from a
//! queue abstraction.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::CoreResult;
use crate::model::{Choice, ConflictDecision, PathRecord, Side};
use crate::shutdown::ShutdownFlag;
use crate::store::{now_millis, PendingFilter, Store};

/// Poll interval while waiting for a new conflict or a wake signal. Kept
/// short since `notify` short-circuits the common case; this is only the
/// fallback for "a new row became awaiting_decision without anyone calling
/// `notify`" (e.g. the scanner's immediate kind-clash classification).
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ConflictBroker<'a> {
    store: &'a Store,
    wake: Mutex<()>,
    condvar: Condvar,
}

impl<'a> ConflictBroker<'a> {
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            wake: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Called by the Classifier (or Scanner, for immediate kind clashes)
    /// whenever a row newly enters `awaiting_decision`, to wake a blocked
    /// `next_conflict` caller promptly instead of waiting out the poll
    /// interval.
    pub fn notify(&self) {
        let _guard = self.wake.lock();
        self.condvar.notify_all();
    }

    /// Block until a conflict is available, `shutdown` is triggered, or no
    /// conflicts are left and classification has already finished (caller
    /// decides the latter via `done` and passes `false` once it knows no
    /// more rows will ever arrive).
    ///
    /// # Errors
    /// Propagates [`crate::error::CoreError::StoreUnavailable`] from the store.
    pub fn next_conflict(
        &self,
        shutdown: &ShutdownFlag,
        classification_done: &dyn Fn() -> bool,
    ) -> CoreResult<Option<PathRecord>> {
        loop {
            if shutdown.is_triggered() {
                return Ok(None);
            }
            let rows = self.store.iter_pending(PendingFilter::AwaitingDecision, 1)?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row));
            }
            if classification_done() {
                return Ok(None);
            }
            let mut guard = self.wake.lock();
            self.condvar.wait_for(&mut guard, POLL_INTERVAL);
        }
    }

    /// Commit a decision transactionally (status -> ready, decision write,
    /// `ConflictLog` append — all three or none, per I5).
    ///
    /// # Errors
    /// Propagates [`crate::error::CoreError::StoreUnavailable`] from the store.
    pub fn submit_decision(&self, row: &PathRecord, choice: Choice) -> CoreResult<()> {
        let winner = pick_winner(row, choice);
        let decision = ConflictDecision {
            rel_path: row.rel_path.clone(),
            choice,
            winner,
            decided_at: now_millis(),
        };
        self.store.record_decision(&decision, &row.a, &row.b)
    }
}

/// `prefer_newer` picks the strictly-larger-mtime side, tie -> A.
/// `prefer_older` picks the strictly-smaller-mtime side, tie -> A.
/// `inspect_then_*` behave identically to their non-inspect counterpart
/// for winner selection (the distinction is recorded in the log only).
#[must_use]
pub fn pick_winner(row: &PathRecord, choice: Choice) -> Side {
    let a_mtime = row.a.mtime.unwrap_or(i64::MIN);
    let b_mtime = row.b.mtime.unwrap_or(i64::MIN);
    if choice.prefers_newer() {
        if b_mtime > a_mtime {
            Side::B
        } else {
            Side::A
        }
    } else if b_mtime < a_mtime {
        Side::B
    } else {
        Side::A
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::SideData;

    fn row_with_mtimes(a_mtime: Option<i64>, b_mtime: Option<i64>) -> PathRecord {
        let mut r = PathRecord::new("p");
        r.a = SideData {
            present: true,
            mtime: a_mtime,
            ..SideData::absent()
        };
        r.b = SideData {
            present: true,
            mtime: b_mtime,
            ..SideData::absent()
        };
        r
    }

    #[test]
    fn prefer_newer_picks_the_larger_mtime() {
        let row = row_with_mtimes(Some(10), Some(20));
        assert_eq!(pick_winner(&row, Choice::PreferNewer), Side::B);
    }

    #[test]
    fn prefer_newer_ties_go_to_a() {
        let row = row_with_mtimes(Some(10), Some(10));
        assert_eq!(pick_winner(&row, Choice::PreferNewer), Side::A);
    }

    #[test]
    fn prefer_older_picks_the_smaller_mtime() {
        let row = row_with_mtimes(Some(10), Some(20));
        assert_eq!(pick_winner(&row, Choice::PreferOlder), Side::A);
    }

    #[test]
    fn prefer_older_ties_go_to_a() {
        let row = row_with_mtimes(Some(10), Some(10));
        assert_eq!(pick_winner(&row, Choice::PreferOlder), Side::A);
    }

    #[test]
    fn inspect_variants_pick_the_same_winner_as_their_plain_counterpart() {
        let row = row_with_mtimes(Some(10), Some(20));
        assert_eq!(
            pick_winner(&row, Choice::InspectThenNewer),
            pick_winner(&row, Choice::PreferNewer)
        );
        assert_eq!(
            pick_winner(&row, Choice::InspectThenOlder),
            pick_winner(&row, Choice::PreferOlder)
        );
    }

    #[test]
    fn next_conflict_returns_none_once_shutdown_is_triggered() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_or_create(&dir.path().join("merge.db")).unwrap();
        let broker = ConflictBroker::new(&store);
        let shutdown = ShutdownFlag::new();
        shutdown.trigger();
        assert_eq!(broker.next_conflict(&shutdown, &|| true).unwrap(), None);
    }

    #[test]
    fn next_conflict_returns_none_once_classification_done_and_queue_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_or_create(&dir.path().join("merge.db")).unwrap();
        let broker = ConflictBroker::new(&store);
        let shutdown = ShutdownFlag::new();
        assert_eq!(broker.next_conflict(&shutdown, &|| true).unwrap(), None);
    }
}
