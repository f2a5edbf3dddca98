//! Classifier: the decision table from §4.4 of the design doc.
//!
//! `classify` is a pure function — no I/O, no interior mutability — so it
//! can be fuzzed and property-tested directly against [`PathRecord`]
//! values without a store in the loop.

use crate::model::{Action, Kind, PathRecord, Side};
use crate::store::{PendingFilter, Store};

/// Classify a single row. Both sides must already have whatever hashes
/// they need (the caller is expected to only pass rows returned by
/// [`PendingFilter::NeedsClassification`]).
#[must_use]
pub fn classify(row: &PathRecord) -> Action {
    let a = &row.a;
    let b = &row.b;

    if !a.present {
        return action_for_single_side(b, Side::B);
    }
    if !b.present {
        return action_for_single_side(a, Side::A);
    }

    match (a.kind, b.kind) {
        (Some(Kind::Dir), Some(Kind::Dir)) => Action::Mkdir,
        (Some(Kind::Symlink), Some(Kind::Symlink)) => {
            if a.link_target == b.link_target {
                Action::CreateSymlink {
                    target: a.link_target.clone().unwrap_or_default(),
                    source: Side::A,
                }
            } else {
                Action::Conflict
            }
        }
        (Some(Kind::File), Some(Kind::File)) => classify_two_files(a, b),
        _ => Action::Conflict, // kind mismatch (policy C)
    }
}

fn classify_two_files(a: &crate::model::SideData, b: &crate::model::SideData) -> Action {
    match (a.size, b.size) {
        (Some(sa), Some(sb)) if sa != sb => Action::Conflict,
        _ => match (a.hash, b.hash) {
            (Some(ha), Some(hb)) if ha == hb => Action::CopyFrom(Side::A),
            (Some(_), Some(_)) => Action::Conflict,
            // Zero-length files on both sides: B1 — equal without hashing.
            _ if a.size == Some(0) && b.size == Some(0) => Action::CopyFrom(Side::A),
            // Hashes not populated yet; caller filtered these out already,
            // but fall back to a conservative conflict rather than copy.
            _ => Action::Conflict,
        },
    }
}

fn action_for_single_side(side: &crate::model::SideData, which: Side) -> Action {
    match side.kind {
        Some(Kind::Dir) => Action::Mkdir,
        Some(Kind::Symlink) => Action::CreateSymlink {
            target: side.link_target.clone().unwrap_or_default(),
            source: which,
        },
        _ => Action::CopyFrom(which),
    }
}

/// Drain every row needing classification, writing `action` (and the
/// derived `status`) back to the store, until none remain.
///
/// # Errors
/// Propagates [`crate::error::CoreError::StoreUnavailable`] from the store.
pub fn run(store: &Store) -> crate::error::CoreResult<()> {
    const BATCH: usize = 256;
    loop {
        let rows = store.iter_pending(PendingFilter::NeedsClassification, BATCH)?;
        if rows.is_empty() {
            return Ok(());
        }
        for row in &rows {
            let action = classify(row);
            store.set_action(&row.rel_path, &action)?;
        }
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::model::SideData;
    use proptest::prelude::any;

    fn file(size: u64, hash: Option<u64>) -> SideData {
        SideData {
            present: true,
            kind: Some(Kind::File),
            size: Some(size),
            mtime: Some(0),
            hash,
            link_target: None,
        }
    }

    fn dir() -> SideData {
        SideData {
            present: true,
            kind: Some(Kind::Dir),
            ..SideData::absent()
        }
    }

    fn symlink(target: &str) -> SideData {
        SideData {
            present: true,
            kind: Some(Kind::Symlink),
            link_target: Some(target.to_owned()),
            ..SideData::absent()
        }
    }

    fn row(a: SideData, b: SideData) -> PathRecord {
        let mut r = PathRecord::new("p");
        r.a = a;
        r.b = b;
        r
    }

    #[test]
    fn absent_on_one_side_copies_from_the_other() {
        let present_on_a = row(file(10, Some(1)), SideData::absent());
        assert_eq!(classify(&present_on_a), Action::CopyFrom(Side::A));

        let present_on_b = row(SideData::absent(), file(10, Some(1)));
        assert_eq!(classify(&present_on_b), Action::CopyFrom(Side::B));
    }

    #[test]
    fn both_dirs_is_mkdir() {
        assert_eq!(classify(&row(dir(), dir())), Action::Mkdir);
    }

    #[test]
    fn matching_symlinks_create_symlink_from_a() {
        let action = classify(&row(symlink("target"), symlink("target")));
        assert_eq!(
            action,
            Action::CreateSymlink {
                target: "target".to_owned(),
                source: Side::A,
            }
        );
    }

    #[test]
    fn diverging_symlink_targets_conflict() {
        assert_eq!(classify(&row(symlink("a"), symlink("b"))), Action::Conflict);
    }

    #[test]
    fn kind_mismatch_conflicts() {
        assert_eq!(classify(&row(dir(), file(10, Some(1)))), Action::Conflict);
        assert_eq!(classify(&row(symlink("t"), file(10, Some(1)))), Action::Conflict);
    }

    #[test]
    fn files_of_different_size_conflict_without_hashing() {
        assert_eq!(classify(&row(file(10, None), file(20, None))), Action::Conflict);
    }

    #[test]
    fn files_of_equal_size_and_hash_copy_from_a() {
        assert_eq!(
            classify(&row(file(10, Some(42)), file(10, Some(42)))),
            Action::CopyFrom(Side::A)
        );
    }

    #[test]
    fn files_of_equal_size_different_hash_conflict() {
        assert_eq!(classify(&row(file(10, Some(1)), file(10, Some(2)))), Action::Conflict);
    }

    #[test]
    fn zero_length_files_are_equal_without_hashing() {
        assert_eq!(
            classify(&row(file(0, None), file(0, None))),
            Action::CopyFrom(Side::A)
        );
    }

    proptest::proptest! {
        /// Same size + same hash must always classify to a copy, never a
        /// conflict, regardless of what the other fields happen to be.
        #[test]
        fn equal_size_and_hash_never_conflicts(size in 0_u64..1_000_000, hash in any::<u64>()) {
            let action = classify(&row(file(size, Some(hash)), file(size, Some(hash))));
            proptest::prop_assert_eq!(action, Action::CopyFrom(Side::A));
        }

        /// Differing sizes must always conflict, regardless of hashes.
        #[test]
        fn differing_size_always_conflicts(a_size in 0_u64..1_000, delta in 1_u64..1_000) {
            let action = classify(&row(file(a_size, None), file(a_size + delta, None)));
            proptest::prop_assert_eq!(action, Action::Conflict);
        }
    }
}
