//! The embedded store: run metadata, per-path records, and the append-only
//! conflict log.
//!
//! Backed by `rusqlite` (bundled SQLite). Single-writer in practice — all
//! mutating calls take `&self` but serialize on an internal mutex, matching
//! the "Coordinator serializes commits" contract from the design doc. Many
//! readers are fine since SQLite's WAL mode allows concurrent readers
//! alongside the one writer.

mod schema;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::model::{
    Action, Choice, ConflictDecision, Kind, Phase, PathRecord, Run, RunMode, ScannedEntry,
    SideData, Side, Status,
};

/// Which subset of `path` rows to fetch. Mirrors the design doc's
/// `iter_pending(filter)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingFilter {
    /// Both sides are `file`, same size, and this side's hash is still null.
    NeedsHash(Side),
    /// `status = pending` and neither side still needs a hash.
    NeedsClassification,
    /// `status = awaiting_decision`.
    AwaitingDecision,
    /// `status = ready`.
    Ready,
    /// `status = ready AND action = mkdir` — directories only, so the
    /// Applier can create every directory before touching any file.
    ReadyMkdir,
    /// Any status that should be re-offered to the pipeline on resume.
    Resumable,
    /// `status = applied AND action = copy_from` — the rows the Applier's
    /// resume-time hash-mismatch check needs to re-verify against the
    /// destination.
    AppliedCopies,
}

pub struct Store {
    conn: Mutex<Connection>,
    commit_batch_size: usize,
    db_path: PathBuf,
}

const DEFAULT_COMMIT_BATCH_SIZE: usize = 256;

impl Store {
    /// Open an existing store or create a fresh one at `path`.
    ///
    /// # Errors
    /// Returns [`CoreError::StoreUnavailable`] on I/O failure, or
    /// [`CoreError::SchemaVersionMismatch`] if an existing store was written
    /// by an incompatible schema version.
    pub fn open_or_create(path: &Path) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(schema::DDL)?;

        if let Some(found) = Self::existing_schema_version(&conn)? {
            if found != schema::SCHEMA_VERSION {
                return Err(CoreError::SchemaVersionMismatch {
                    found,
                    expected: schema::SCHEMA_VERSION,
                });
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            commit_batch_size: DEFAULT_COMMIT_BATCH_SIZE,
            db_path: path.to_path_buf(),
        })
    }

    fn existing_schema_version(conn: &Connection) -> CoreResult<Option<i32>> {
        let v: Option<i32> = conn
            .query_row("SELECT schema_version FROM run LIMIT 1", [], |r| r.get(0))
            .optional()?;
        Ok(v)
    }

    #[must_use]
    pub const fn commit_batch_size(&self) -> usize {
        self.commit_batch_size
    }

    /// Decide fresh-vs-resumed and (re)populate the `run` row.
    ///
    /// `reset` truncates any existing run and all its rows (I5: a re-run
    /// with `--reset` truncates the whole store, never individual rows).
    /// Without `--reset`, an existing run whose roots don't match `a`/`b`/
    /// `dest` is a fatal usage error (open question in the design doc,
    /// resolved in favor of "fatal": silently resuming against different
    /// roots would corrupt the destination tree).
    ///
    /// # Errors
    /// [`CoreError::RootMismatch`] if an existing run's roots differ and
    /// `reset` is false. [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn begin_run(
        &self,
        a: &Path,
        b: &Path,
        dest: &Path,
        reset: bool,
    ) -> CoreResult<(Run, RunMode)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<(String, String, String, String, String, i64, i32)> = tx
            .query_row(
                "SELECT id, a_root, b_root, dest_root, phase, created_at, schema_version \
                 FROM run LIMIT 1",
                [],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                    ))
                },
            )
            .optional()?;

        if reset {
            tx.execute("DELETE FROM run", [])?;
            tx.execute("DELETE FROM path", [])?;
            tx.execute("DELETE FROM conflict_log", [])?;
            let run = insert_fresh_run(&tx, a, b, dest)?;
            tx.commit()?;
            return Ok((run, RunMode::Fresh));
        }

        if let Some((id, a_root, b_root, dest_root, phase, created_at, schema_version)) = existing
        {
            let recorded_a = PathBuf::from(&a_root);
            let recorded_b = PathBuf::from(&b_root);
            let recorded_dest = PathBuf::from(&dest_root);
            if recorded_a != a || recorded_b != b || recorded_dest != dest {
                return Err(CoreError::RootMismatch {
                    db_path: self.db_path.clone(),
                    recorded_a,
                    recorded_b,
                    recorded_dest,
                });
            }
            tx.commit()?;
            let run = Run {
                id,
                a_root: recorded_a,
                b_root: recorded_b,
                dest_root: recorded_dest,
                phase: Phase::parse(&phase).map_err(|d| CoreError::StoreUnavailable { detail: d })?,
                created_at,
                schema_version,
            };
            return Ok((run, RunMode::Resumed));
        }

        let run = insert_fresh_run(&tx, a, b, dest)?;
        tx.commit()?;
        Ok((run, RunMode::Fresh))
    }

    /// Merge a batch of scanned entries into `path`, setting `in_a`/`in_b`
    /// and that side's kind/size/mtime/link-target without clobbering the
    /// other side. If a path is `file` on one side and `dir` on the other
    /// after this merge, it is classified as `conflict` immediately,
    /// without waiting for the Fingerprinter (scanner-time short-circuit).
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn upsert_scanned(&self, entries: &[ScannedEntry]) -> CoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for entry in entries {
            let (in_col, kind_col, size_col, mtime_col, link_col) = match entry.side {
                Side::A => ("in_a", "kind_a", "size_a", "mtime_a", "link_target_a"),
                Side::B => ("in_b", "kind_b", "size_b", "mtime_b", "link_target_b"),
            };
            tx.execute(
                "INSERT INTO path (rel_path, status) VALUES (?1, ?2)
                 ON CONFLICT(rel_path) DO NOTHING",
                params![entry.rel_path, Status::Pending.as_str()],
            )?;
            let sql = format!(
                "UPDATE path SET {in_col} = 1, {kind_col} = ?2, {size_col} = ?3, \
                 {mtime_col} = ?4, {link_col} = ?5 WHERE rel_path = ?1"
            );
            tx.execute(
                &sql,
                params![
                    entry.rel_path,
                    entry.kind.as_str(),
                    entry.size.map(|v| v as i64),
                    entry.mtime,
                    entry.link_target,
                ],
            )?;
        }
        tx.commit()?;

        // Short-circuit file-vs-dir clashes to `conflict` without hashing.
        for entry in entries {
            self.maybe_mark_kind_clash(&conn, &entry.rel_path)?;
        }
        Ok(())
    }

    fn maybe_mark_kind_clash(&self, conn: &Connection, rel_path: &str) -> CoreResult<()> {
        let row: Option<(bool, bool, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT in_a, in_b, kind_a, kind_b FROM path WHERE rel_path = ?1",
                params![rel_path],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((in_a, in_b, kind_a, kind_b)) = row else {
            return Ok(());
        };
        if !in_a || !in_b {
            return Ok(());
        }
        let (Some(ka), Some(kb)) = (kind_a, kind_b) else {
            return Ok(());
        };
        let kind_clash = (ka == "dir") != (kb == "dir") && ka != "symlink" && kb != "symlink";
        if kind_clash {
            let seq = next_awaiting_seq(conn)?;
            conn.execute(
                "UPDATE path SET action = ?2, status = ?3, awaiting_seq = ?4 \
                 WHERE rel_path = ?1 AND action IS NULL",
                params![
                    rel_path,
                    Action::Conflict.tag(),
                    Status::AwaitingDecision.as_str(),
                    seq
                ],
            )?;
        }
        Ok(())
    }

    /// Record a side's content hash.
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn set_hash(&self, rel_path: &str, side: Side, hash: u64) -> CoreResult<()> {
        let conn = self.conn.lock();
        let col = match side {
            Side::A => "hash_a",
            Side::B => "hash_b",
        };
        let sql = format!("UPDATE path SET {col} = ?2 WHERE rel_path = ?1");
        conn.execute(&sql, params![rel_path, hash as i64])?;
        Ok(())
    }

    /// Record the Classifier's decision for a row and advance `status`
    /// (`conflict` -> `awaiting_decision`, anything else -> `ready`).
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn set_action(&self, rel_path: &str, action: &Action) -> CoreResult<()> {
        let conn = self.conn.lock();
        let (detail, status) = match action {
            Action::Conflict => (None, Status::AwaitingDecision),
            Action::CopyFrom(side) => (Some(side.as_str().to_owned()), Status::Ready),
            Action::Mkdir => (None, Status::Ready),
            Action::CreateSymlink { target, source } => (
                Some(format!("{}\u{0}{}", source.as_str(), target)),
                Status::Ready,
            ),
        };
        let seq = if matches!(status, Status::AwaitingDecision) {
            Some(next_awaiting_seq(&conn)?)
        } else {
            None
        };
        conn.execute(
            "UPDATE path SET action = ?2, action_detail = ?3, status = ?4, awaiting_seq = ?5 \
             WHERE rel_path = ?1 AND status = 'pending'",
            params![rel_path, action.tag(), detail, status.as_str(), seq],
        )?;
        Ok(())
    }

    /// Advance or fail a row.
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn set_status(&self, rel_path: &str, status: Status, error: Option<&str>) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE path SET status = ?2, error = ?3 WHERE rel_path = ?1",
            params![rel_path, status.as_str(), error],
        )?;
        Ok(())
    }

    /// Record a conflict decision transactionally: sets `status = ready`,
    /// rewrites `action` from `conflict` to `copy_from` the winning side,
    /// writes the decision onto the row, and appends the audit snapshot to
    /// `conflict_log`. All of it commits together or none does (I5).
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn record_decision(
        &self,
        decision: &ConflictDecision,
        a_snapshot: &SideData,
        b_snapshot: &SideData,
    ) -> CoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE path SET status = ?2, action = ?3, action_detail = ?4, \
             decision_choice = ?5, winner = ?6, decided_at = ?7 WHERE rel_path = ?1",
            params![
                decision.rel_path,
                Status::Ready.as_str(),
                Action::CopyFrom(decision.winner).tag(),
                decision.winner.as_str(),
                decision.choice.as_str(),
                decision.winner.as_str(),
                decision.decided_at,
            ],
        )?;
        let a_json = serde_json::to_string(a_snapshot)
            .map_err(|e| CoreError::StoreUnavailable { detail: e.to_string() })?;
        let b_json = serde_json::to_string(b_snapshot)
            .map_err(|e| CoreError::StoreUnavailable { detail: e.to_string() })?;
        tx.execute(
            "INSERT INTO conflict_log (rel_path, choice, winner, a_snapshot_json, \
             b_snapshot_json, decided_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                decision.rel_path,
                decision.choice.as_str(),
                decision.winner.as_str(),
                a_json,
                b_json,
                decision.decided_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Fetch rows matching `filter`, up to `limit` (0 = unbounded).
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn iter_pending(&self, filter: PendingFilter, limit: usize) -> CoreResult<Vec<PathRecord>> {
        let conn = self.conn.lock();
        let where_clause: &str = match filter {
            PendingFilter::NeedsHash(Side::A) => {
                "status = 'pending' AND kind_a = 'file' AND kind_b = 'file' \
                 AND size_a = size_b AND hash_a IS NULL"
            }
            PendingFilter::NeedsHash(Side::B) => {
                "status = 'pending' AND kind_a = 'file' AND kind_b = 'file' \
                 AND size_a = size_b AND hash_b IS NULL"
            }
            PendingFilter::NeedsClassification => {
                "status = 'pending' AND action IS NULL AND \
                 ((in_a = 1 AND in_b = 0) OR (in_a = 0 AND in_b = 1) OR \
                  (in_a = 1 AND in_b = 1 AND kind_a <> kind_b) OR \
                  (kind_a = 'dir' AND kind_b = 'dir') OR \
                  (kind_a = 'symlink' AND kind_b = 'symlink') OR \
                  (kind_a = 'file' AND kind_b = 'file' AND size_a = size_b \
                   AND hash_a IS NOT NULL AND hash_b IS NOT NULL) OR \
                  (kind_a = 'file' AND kind_b = 'file' AND size_a <> size_b))"
            }
            PendingFilter::AwaitingDecision => "status = 'awaiting_decision'",
            PendingFilter::Ready => "status = 'ready'",
            PendingFilter::ReadyMkdir => "status = 'ready' AND action = 'mkdir'",
            PendingFilter::Resumable => "status IN ('pending', 'awaiting_decision', 'ready')",
            PendingFilter::AppliedCopies => "status = 'applied' AND action = 'copy_from'",
        };
        let order_clause = match filter {
            // FIFO by arrival into `awaiting_decision` (§4.5).
            PendingFilter::AwaitingDecision => " ORDER BY awaiting_seq ASC",
            _ => " ORDER BY rel_path ASC",
        };
        let limit_clause = if limit == 0 {
            String::new()
        } else {
            format!(" LIMIT {limit}")
        };
        let sql = format!(
            "SELECT rel_path, in_a, in_b, kind_a, kind_b, size_a, size_b, mtime_a, mtime_b, \
             hash_a, hash_b, link_target_a, link_target_b, action, action_detail, status, \
             decision_choice, winner, decided_at, error \
             FROM path WHERE {where_clause}{order_clause}{limit_clause}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(CoreError::from)?);
        }
        Ok(out)
    }

    /// Single-row lookup, mainly used by tests. Batch consumers (the
    /// pipeline stages, the resume-time hash-mismatch check) go through
    /// [`Self::iter_pending`] instead, since they always need more than one
    /// row at a time.
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn get(&self, rel_path: &str) -> CoreResult<Option<PathRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT rel_path, in_a, in_b, kind_a, kind_b, size_a, size_b, mtime_a, mtime_b, \
             hash_a, hash_b, link_target_a, link_target_b, action, action_detail, status, \
             decision_choice, winner, decided_at, error \
             FROM path WHERE rel_path = ?1",
            params![rel_path],
            row_to_record,
        )
        .optional()
        .map_err(CoreError::from)
    }

    /// Advance the run's phase.
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn mark_phase(&self, phase: Phase) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE run SET phase = ?1", params![phase.as_str()])?;
        Ok(())
    }

    /// Counters for the progress stream: total rows, classified (action
    /// set), awaiting decision, applied, failed.
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn progress_counts(&self) -> CoreResult<(u64, u64, u64, u64, u64)> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM path", [], |r| r.get(0))?;
        let classified: i64 = conn.query_row(
            "SELECT COUNT(*) FROM path WHERE action IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let awaiting: i64 = conn.query_row(
            "SELECT COUNT(*) FROM path WHERE status = 'awaiting_decision'",
            [],
            |r| r.get(0),
        )?;
        let applied: i64 = conn.query_row(
            "SELECT COUNT(*) FROM path WHERE status = 'applied'",
            [],
            |r| r.get(0),
        )?;
        let failed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM path WHERE status = 'failed'",
            [],
            |r| r.get(0),
        )?;
        Ok((
            total as u64,
            classified as u64,
            awaiting as u64,
            applied as u64,
            failed as u64,
        ))
    }

    /// Number of `conflict_log` rows, used by tests asserting P5.
    ///
    /// # Errors
    /// [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn conflict_log_len(&self) -> CoreResult<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM conflict_log", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}

fn next_awaiting_seq(conn: &Connection) -> CoreResult<i64> {
    let max: Option<i64> =
        conn.query_row("SELECT MAX(awaiting_seq) FROM path", [], |r| r.get(0))?;
    Ok(max.unwrap_or(0) + 1)
}

fn insert_fresh_run(tx: &rusqlite::Transaction<'_>, a: &Path, b: &Path, dest: &Path) -> CoreResult<Run> {
    let id = new_run_id();
    let created_at = now_millis();
    tx.execute(
        "INSERT INTO run (id, a_root, b_root, dest_root, phase, created_at, schema_version) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            a.to_string_lossy(),
            b.to_string_lossy(),
            dest.to_string_lossy(),
            Phase::Scanning.as_str(),
            created_at,
            schema::SCHEMA_VERSION,
        ],
    )?;
    Ok(Run {
        id,
        a_root: a.to_path_buf(),
        b_root: b.to_path_buf(),
        dest_root: dest.to_path_buf(),
        phase: Phase::Scanning,
        created_at,
        schema_version: schema::SCHEMA_VERSION,
    })
}

#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn new_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("run-{nanos:x}")
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open_or_create(&dir.path().join("merge.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn begin_run_is_fresh_on_an_empty_store() {
        let (_dir, store) = open_store();
        let (run, mode) = store
            .begin_run(Path::new("/a"), Path::new("/b"), Path::new("/dest"), false)
            .unwrap();
        assert_eq!(mode, RunMode::Fresh);
        assert_eq!(run.phase, Phase::Scanning);
    }

    #[test]
    fn begin_run_resumes_matching_roots() {
        let (_dir, store) = open_store();
        let (first, _) = store
            .begin_run(Path::new("/a"), Path::new("/b"), Path::new("/dest"), false)
            .unwrap();
        let (second, mode) = store
            .begin_run(Path::new("/a"), Path::new("/b"), Path::new("/dest"), false)
            .unwrap();
        assert_eq!(mode, RunMode::Resumed);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn begin_run_rejects_mismatched_roots_without_reset() {
        let (_dir, store) = open_store();
        store
            .begin_run(Path::new("/a"), Path::new("/b"), Path::new("/dest"), false)
            .unwrap();
        let err = store
            .begin_run(Path::new("/a"), Path::new("/other"), Path::new("/dest"), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::RootMismatch { .. }));
    }

    #[test]
    fn begin_run_with_reset_discards_the_prior_run_and_rows() {
        let (_dir, store) = open_store();
        store
            .begin_run(Path::new("/a"), Path::new("/b"), Path::new("/dest"), false)
            .unwrap();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "f.txt".into(),
                side: Side::A,
                kind: Kind::File,
                size: Some(3),
                mtime: Some(1),
                link_target: None,
            }])
            .unwrap();
        let (_, mode) = store
            .begin_run(Path::new("/a"), Path::new("/other"), Path::new("/dest2"), true)
            .unwrap();
        assert_eq!(mode, RunMode::Fresh);
        assert!(store.get("f.txt").unwrap().is_none());
    }

    #[test]
    fn upsert_scanned_merges_both_sides_without_clobbering() {
        let (_dir, store) = open_store();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "f.txt".into(),
                side: Side::A,
                kind: Kind::File,
                size: Some(10),
                mtime: Some(100),
                link_target: None,
            }])
            .unwrap();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "f.txt".into(),
                side: Side::B,
                kind: Kind::File,
                size: Some(10),
                mtime: Some(200),
                link_target: None,
            }])
            .unwrap();
        let row = store.get("f.txt").unwrap().unwrap();
        assert!(row.a.present && row.b.present);
        assert_eq!(row.a.size, Some(10));
        assert_eq!(row.b.mtime, Some(200));
    }

    #[test]
    fn upsert_scanned_short_circuits_kind_clash_to_awaiting_decision() {
        let (_dir, store) = open_store();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "x".into(),
                side: Side::A,
                kind: Kind::Dir,
                size: None,
                mtime: None,
                link_target: None,
            }])
            .unwrap();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "x".into(),
                side: Side::B,
                kind: Kind::File,
                size: Some(1),
                mtime: Some(1),
                link_target: None,
            }])
            .unwrap();
        let row = store.get("x").unwrap().unwrap();
        assert_eq!(row.status, Status::AwaitingDecision);
        assert_eq!(row.action, Some(Action::Conflict));
    }

    #[test]
    fn needs_classification_includes_symlink_vs_non_symlink_mismatch() {
        // `maybe_mark_kind_clash` deliberately excludes symlink kinds from
        // its scan-time short-circuit, so a symlink-vs-file (or
        // symlink-vs-dir) row must still surface via NeedsClassification
        // instead of being silently stuck at status='pending'/action=NULL.
        let (_dir, store) = open_store();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "x".into(),
                side: Side::A,
                kind: Kind::Symlink,
                size: None,
                mtime: Some(1),
                link_target: Some("target".into()),
            }])
            .unwrap();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "x".into(),
                side: Side::B,
                kind: Kind::File,
                size: Some(4),
                mtime: Some(1),
                link_target: None,
            }])
            .unwrap();

        let row = store.get("x").unwrap().unwrap();
        assert_eq!(row.status, Status::Pending);
        assert_eq!(row.action, None);

        let pending = store
            .iter_pending(PendingFilter::NeedsClassification, 0)
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].rel_path, "x");
    }

    #[test]
    fn set_action_advances_status_and_iter_pending_filters_by_it() {
        let (_dir, store) = open_store();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "dir1".into(),
                side: Side::A,
                kind: Kind::Dir,
                size: None,
                mtime: None,
                link_target: None,
            }])
            .unwrap();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "dir1".into(),
                side: Side::B,
                kind: Kind::Dir,
                size: None,
                mtime: None,
                link_target: None,
            }])
            .unwrap();
        store.set_action("dir1", &Action::Mkdir).unwrap();

        let ready = store.iter_pending(PendingFilter::ReadyMkdir, 0).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].rel_path, "dir1");
        assert!(store.iter_pending(PendingFilter::Ready, 0).unwrap().len() == 1);
    }

    #[test]
    fn record_decision_sets_ready_and_appends_to_conflict_log() {
        let (_dir, store) = open_store();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "c".into(),
                side: Side::A,
                kind: Kind::File,
                size: Some(1),
                mtime: Some(1),
                link_target: None,
            }])
            .unwrap();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "c".into(),
                side: Side::B,
                kind: Kind::File,
                size: Some(2),
                mtime: Some(2),
                link_target: None,
            }])
            .unwrap();
        store.set_action("c", &Action::Conflict).unwrap();

        let decision = ConflictDecision {
            rel_path: "c".into(),
            choice: Choice::PreferNewer,
            winner: Side::B,
            decided_at: now_millis(),
        };
        store
            .record_decision(&decision, &SideData::absent(), &SideData::absent())
            .unwrap();

        let row = store.get("c").unwrap().unwrap();
        assert_eq!(row.status, Status::Ready);
        assert_eq!(row.action, Some(Action::CopyFrom(Side::B)));
        assert_eq!(row.decision.unwrap().winner, Side::B);
        assert_eq!(store.conflict_log_len().unwrap(), 1);
    }

    #[test]
    fn progress_counts_reflect_row_statuses() {
        let (_dir, store) = open_store();
        store
            .upsert_scanned(&[ScannedEntry {
                rel_path: "p".into(),
                side: Side::A,
                kind: Kind::File,
                size: Some(1),
                mtime: Some(1),
                link_target: None,
            }])
            .unwrap();
        let (total, classified, awaiting, applied, failed) = store.progress_counts().unwrap();
        assert_eq!((total, classified, awaiting, applied, failed), (1, 0, 0, 0, 0));
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PathRecord> {
    let rel_path: String = row.get(0)?;
    let in_a: bool = row.get(1)?;
    let in_b: bool = row.get(2)?;
    let kind_a: Option<String> = row.get(3)?;
    let kind_b: Option<String> = row.get(4)?;
    let size_a: Option<i64> = row.get(5)?;
    let size_b: Option<i64> = row.get(6)?;
    let mtime_a: Option<i64> = row.get(7)?;
    let mtime_b: Option<i64> = row.get(8)?;
    let hash_a: Option<i64> = row.get(9)?;
    let hash_b: Option<i64> = row.get(10)?;
    let link_a: Option<String> = row.get(11)?;
    let link_b: Option<String> = row.get(12)?;
    let action_tag: Option<String> = row.get(13)?;
    let action_detail: Option<String> = row.get(14)?;
    let status: String = row.get(15)?;
    let decision_choice: Option<String> = row.get(16)?;
    let winner: Option<String> = row.get(17)?;
    let decided_at: Option<i64> = row.get(18)?;
    let error: Option<String> = row.get(19)?;

    let parse_kind = |s: Option<String>| -> Option<Kind> { s.and_then(|v| Kind::parse(&v).ok()) };
    let parse_side = |s: &str| -> Side {
        if s == "a" {
            Side::A
        } else {
            Side::B
        }
    };

    let action = match action_tag.as_deref() {
        Some("copy_from") => action_detail.map(|d| Action::CopyFrom(parse_side(&d))),
        Some("mkdir") => Some(Action::Mkdir),
        Some("conflict") => Some(Action::Conflict),
        Some("create_symlink") => action_detail.and_then(|d| {
            let mut parts = d.splitn(2, '\u{0}');
            let source = parts.next()?;
            let target = parts.next()?;
            Some(Action::CreateSymlink {
                target: target.to_owned(),
                source: parse_side(source),
            })
        }),
        _ => None,
    };

    let decision = match (decision_choice, winner, decided_at) {
        (Some(c), Some(w), Some(t)) => Choice::parse(&c).ok().map(|choice| ConflictDecision {
            rel_path: rel_path.clone(),
            choice,
            winner: parse_side(&w),
            decided_at: t,
        }),
        _ => None,
    };

    Ok(PathRecord {
        rel_path,
        a: SideData {
            present: in_a,
            kind: parse_kind(kind_a),
            size: size_a.map(|v| v as u64),
            mtime: mtime_a,
            hash: hash_a.map(|v| v as u64),
            link_target: link_a,
        },
        b: SideData {
            present: in_b,
            kind: parse_kind(kind_b),
            size: size_b.map(|v| v as u64),
            mtime: mtime_b,
            hash: hash_b.map(|v| v as u64),
            link_target: link_b,
        },
        action,
        status: Status::parse(&status).unwrap_or(Status::Pending),
        decision,
        error,
    })
}
