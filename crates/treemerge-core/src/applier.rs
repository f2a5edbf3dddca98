//! Applier: executes `ready` rows' Actions against the destination.
//!
//! Directories are created first (cheap, sequential, idempotent); files and
//! symlinks follow via a bounded worker pool. Rows are claimed by the
//! single dispatcher thread before being handed to a worker, so two
//! workers never target the same `rel_path` (P6) — the dispatcher tracks
//! in-flight paths itself rather than relying on a CAS in the store,
//! since it is the only writer issuing `ready`-row queries.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{CoreResult, RowError};
use crate::model::{Action, PathRecord, Side, Status};
use crate::shutdown::ShutdownFlag;
use crate::store::{PendingFilter, Store};

const DISPATCH_BATCH: usize = 256;
const COPY_CHUNK: usize = 1024 * 1024;

/// Default pool size: same as the Fingerprinter's.
#[must_use]
pub fn default_pool_size() -> usize {
    crate::fingerprint::default_pool_size()
}

/// Which reflink mode the Applier should try before falling back to a
/// plain chunked copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReflinkMode {
    #[default]
    Never,
    Auto,
}

struct Job {
    row: PathRecord,
}

/// Apply every row that is (or becomes) `ready`, until no `ready` rows
/// remain, no rows are in flight, and no rows are still
/// `awaiting_decision` (i.e. the Broker has fully drained). Expects
/// classification to already be complete when called — see the
/// Coordinator's staged dataflow.
///
/// # Errors
/// Propagates [`crate::error::CoreError::StoreUnavailable`] from the store.
#[allow(clippy::too_many_arguments)]
pub fn run(
    store: &Store,
    a_root: &Path,
    b_root: &Path,
    dest_root: &Path,
    run_id: &str,
    pool_size: usize,
    reflink: ReflinkMode,
    shutdown: &ShutdownFlag,
) -> CoreResult<()> {
    apply_directories_first(store, dest_root, shutdown)?;

    let pool_size = pool_size.max(1);
    let (job_tx, job_rx) = bounded::<Job>(pool_size * 4);
    let (done_tx, done_rx) = bounded::<String>(pool_size * 8);

    std::thread::scope(|scope| {
        for _ in 0..pool_size {
            let job_rx: Receiver<Job> = job_rx.clone();
            let done_tx: Sender<String> = done_tx.clone();
            scope.spawn(|| {
                worker_loop(store, a_root, b_root, dest_root, run_id, reflink, &job_rx, &done_tx, shutdown);
            });
        }
        drop(job_rx);
        drop(done_tx);

        let result = dispatch_loop(store, &job_tx, &done_rx, shutdown);
        drop(job_tx);
        result
    })
}

/// Re-verify every `applied` copy row's destination content against the
/// hash recorded for the side it was copied from (§7's
/// `HashMismatchOnResume`). A row whose destination has since diverged —
/// edited, truncated, or removed out from under a prior completed run — is
/// demoted back to `ready` so the next apply pass re-copies it rather than
/// trusting a checkpoint the filesystem has since contradicted. Called once
/// by the Coordinator when resuming an existing run; a fresh run has no
/// `applied` rows yet, so this is a no-op for it.
///
/// Returns the number of rows demoted.
///
/// # Errors
/// Propagates [`crate::error::CoreError::StoreUnavailable`] from the store.
pub fn verify_resumed_hashes(store: &Store, dest_root: &Path) -> CoreResult<u64> {
    let rows = store.iter_pending(PendingFilter::AppliedCopies, 0)?;
    let mut demoted = 0;
    for row in rows {
        let Some(Action::CopyFrom(side)) = row.action else {
            continue;
        };
        let Some(expected) = row.side(side).hash else {
            continue;
        };
        let dest = dest_root.join(&row.rel_path);
        let diverged = match hash_file(&dest) {
            Ok(actual) => actual != expected,
            Err(_) => true,
        };
        if !diverged {
            continue;
        }
        let err = RowError::HashMismatchOnResume {
            detail: row.rel_path.clone(),
        };
        tracing::warn!(rel_path = %row.rel_path, %err, "re-applying on resume");
        store.set_status(&row.rel_path, Status::Ready, None)?;
        demoted += 1;
    }
    Ok(demoted)
}

fn apply_directories_first(store: &Store, dest_root: &Path, shutdown: &ShutdownFlag) -> CoreResult<()> {
    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }
        let dirs = store.iter_pending(PendingFilter::ReadyMkdir, DISPATCH_BATCH)?;
        if dirs.is_empty() {
            return Ok(());
        }
        for row in dirs {
            let dest = dest_root.join(&row.rel_path);
            match fs::create_dir_all(&dest) {
                Ok(()) => store.set_status(&row.rel_path, Status::Applied, None)?,
                Err(err) => store.set_status(&row.rel_path, Status::Failed, Some(&err.to_string()))?,
            }
        }
    }
}

fn dispatch_loop(
    store: &Store,
    job_tx: &Sender<Job>,
    done_rx: &Receiver<String>,
    shutdown: &ShutdownFlag,
) -> CoreResult<()> {
    let mut in_flight: HashSet<String> = HashSet::new();
    loop {
        while let Ok(done_path) = done_rx.try_recv() {
            in_flight.remove(&done_path);
        }
        if shutdown.is_triggered() {
            return Ok(());
        }

        let rows = store.iter_pending(PendingFilter::Ready, DISPATCH_BATCH)?;
        let mut dispatched_any = false;
        for row in rows {
            if matches!(row.action, Some(Action::Mkdir)) {
                continue; // already handled by apply_directories_first
            }
            if in_flight.contains(&row.rel_path) {
                continue;
            }
            in_flight.insert(row.rel_path.clone());
            dispatched_any = true;
            if job_tx.send(Job { row }).is_err() {
                return Ok(());
            }
        }

        if !dispatched_any && in_flight.is_empty() {
            let awaiting = store.iter_pending(PendingFilter::AwaitingDecision, 1)?;
            if awaiting.is_empty() {
                return Ok(());
            }
        }

        if in_flight.is_empty() {
            std::thread::sleep(std::time::Duration::from_millis(100));
        } else {
            // Block briefly for a completion signal so we don't busy-spin
            // while workers are mid-copy.
            let _ = done_rx.recv_timeout(std::time::Duration::from_millis(200));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    store: &Store,
    a_root: &Path,
    b_root: &Path,
    dest_root: &Path,
    run_id: &str,
    reflink: ReflinkMode,
    job_rx: &Receiver<Job>,
    done_tx: &Sender<String>,
    shutdown: &ShutdownFlag,
) {
    for Job { row } in job_rx.iter() {
        if shutdown.is_triggered() {
            let _ = done_tx.send(row.rel_path);
            continue;
        }
        let result = apply_one(&row, a_root, b_root, dest_root, run_id, reflink);
        match result {
            Ok(()) => {
                if let Err(err) = store.set_status(&row.rel_path, Status::Applied, None) {
                    tracing::error!(rel_path = %row.rel_path, %err, "failed to persist applied status");
                }
            }
            Err(err) => {
                let detail = err.to_string();
                if let Err(store_err) = store.set_status(&row.rel_path, Status::Failed, Some(&detail)) {
                    tracing::error!(rel_path = %row.rel_path, %store_err, "failed to persist failure");
                }
            }
        }
        let _ = done_tx.send(row.rel_path.clone());
    }
}

fn apply_one(
    row: &PathRecord,
    a_root: &Path,
    b_root: &Path,
    dest_root: &Path,
    run_id: &str,
    reflink: ReflinkMode,
) -> io::Result<()> {
    let dest = dest_root.join(&row.rel_path);
    match &row.action {
        Some(Action::Mkdir) => fs::create_dir_all(&dest),
        Some(Action::CopyFrom(side)) => {
            let source_root = match side {
                Side::A => a_root,
                Side::B => b_root,
            };
            let source = source_root.join(&row.rel_path);
            let side_data = row.side(*side);
            copy_idempotent(&source, &dest, run_id, side_data.hash, reflink)
        }
        Some(Action::CreateSymlink { target, .. }) => create_symlink_idempotent(target, &dest),
        Some(Action::Conflict) | None => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "row reached the Applier without a resolved, non-conflict action",
        )),
    }
}

/// Copy through a temp sibling (`dest.part.<run_id>`) then atomically
/// rename into place, preserving mtime. If the destination already exists
/// and its content hash matches the intended source's recorded hash, skip
/// (resume idempotence); otherwise overwrite.
fn copy_idempotent(
    source: &Path,
    dest: &Path,
    run_id: &str,
    expected_hash: Option<u64>,
    reflink: ReflinkMode,
) -> io::Result<()> {
    if let (Some(expected), true) = (expected_hash, dest.exists()) {
        if dest.is_file() && hash_file(dest)? == expected {
            return Ok(());
        }
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = sibling_temp_path(dest, run_id);

    if reflink != ReflinkMode::Auto || !try_reflink(source, &temp_path) {
        stream_copy(source, &temp_path)?;
    }

    let metadata = fs::metadata(source)?;
    let mtime = filetime_from_metadata(&metadata);
    set_file_mtime(&temp_path, mtime)?;

    fs::rename(&temp_path, dest)
}

/// `<dest-file-name>.part.<run_id>`, matching the suffix
/// [`crate::scanner::cleanup_stale_temp_files`] looks for on startup.
fn sibling_temp_path(dest: &Path, run_id: &str) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".part.{run_id}"));
    dest.with_file_name(name)
}

/// Best-effort copy-on-write via `cp --reflink=always`. Returns `false` on
/// any failure (missing `cp`, non-CoW filesystem, cross-device, ...) so the
/// caller falls back to a plain chunked copy; never returns an error of its
/// own since reflinking is strictly an optimization.
fn try_reflink(source: &Path, dest: &Path) -> bool {
    std::process::Command::new("cp")
        .arg("--reflink=always")
        .arg(source)
        .arg(dest)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

fn stream_copy(source: &Path, dest: &Path) -> io::Result<()> {
    let mut src = fs::File::open(source)?;
    let mut dst = fs::File::create(dest)?;
    let mut buf = vec![0_u8; COPY_CHUNK];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
    }
    Ok(())
}

fn create_symlink_idempotent(target: &str, dest: &Path) -> io::Result<()> {
    if let Ok(existing) = fs::read_link(dest) {
        if existing.to_string_lossy() == target {
            return Ok(());
        }
        fs::remove_file(dest)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    symlink_verbatim(target, dest)
}

#[cfg(unix)]
fn symlink_verbatim(target: &str, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(windows)]
fn symlink_verbatim(target: &str, dest: &Path) -> io::Result<()> {
    // Best-effort: Windows distinguishes file vs dir symlinks: the engine
    // doesn't (re)stat the target, so default to the file variant.
    std::os::windows::fs::symlink_file(target, dest)
}

fn hash_file(path: &Path) -> io::Result<u64> {
    use xxhash_rust::xxh3::Xxh3;
    let mut file = fs::File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0_u8; COPY_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

fn filetime_from_metadata(metadata: &fs::Metadata) -> std::time::SystemTime {
    metadata.modified().unwrap_or(std::time::UNIX_EPOCH)
}

fn set_file_mtime(path: &Path, mtime: std::time::SystemTime) -> io::Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    file.set_modified(mtime)
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sibling_temp_path_appends_rather_than_replaces_the_extension() {
        let dest = Path::new("/dest/sub/file.tar.gz");
        let temp = sibling_temp_path(dest, "run-1");
        assert_eq!(temp, Path::new("/dest/sub/file.tar.gz.part.run-1"));
    }

    #[test]
    fn copy_idempotent_creates_parents_and_preserves_mtime() {
        let src_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let source = src_dir.path().join("a.txt");
        fs::write(&source, b"hello").unwrap();
        let dest = dest_dir.path().join("nested/a.txt");

        copy_idempotent(&source, &dest, "run-1", None, ReflinkMode::Never).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        let src_mtime = fs::metadata(&source).unwrap().modified().unwrap();
        let dest_mtime = fs::metadata(&dest).unwrap().modified().unwrap();
        assert_eq!(src_mtime, dest_mtime);
    }

    #[test]
    fn copy_idempotent_skips_when_destination_hash_already_matches() {
        let src_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let source = src_dir.path().join("a.txt");
        fs::write(&source, b"hello").unwrap();
        let dest = dest_dir.path().join("a.txt");
        fs::write(&dest, b"hello").unwrap();
        let expected = hash_file(&dest).unwrap();

        // A destination that already matches the expected hash must be left
        // alone (no temp file ever created) rather than recopied.
        copy_idempotent(&source, &dest, "run-1", Some(expected), ReflinkMode::Never).unwrap();
        assert!(!sibling_temp_path(&dest, "run-1").exists());
    }

    #[test]
    fn apply_one_mkdir_creates_the_directory() {
        let dest_dir = tempdir().unwrap();
        let mut row = PathRecord::new("sub/dir");
        row.action = Some(Action::Mkdir);
        apply_one(&row, Path::new("/unused-a"), Path::new("/unused-b"), dest_dir.path(), "run-1", ReflinkMode::Never).unwrap();
        assert!(dest_dir.path().join("sub/dir").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn apply_one_create_symlink_writes_the_recorded_target() {
        let dest_dir = tempdir().unwrap();
        let mut row = PathRecord::new("link");
        row.action = Some(Action::CreateSymlink {
            target: "nowhere".into(),
            source: Side::A,
        });
        apply_one(&row, Path::new("/unused-a"), Path::new("/unused-b"), dest_dir.path(), "run-1", ReflinkMode::Never).unwrap();
        let link = dest_dir.path().join("link");
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("nowhere"));
    }

    #[test]
    fn apply_one_rejects_conflict_and_none_actions() {
        let dest_dir = tempdir().unwrap();
        let mut row = PathRecord::new("x");
        row.action = Some(Action::Conflict);
        assert!(apply_one(&row, Path::new("/a"), Path::new("/b"), dest_dir.path(), "run-1", ReflinkMode::Never).is_err());

        row.action = None;
        assert!(apply_one(&row, Path::new("/a"), Path::new("/b"), dest_dir.path(), "run-1", ReflinkMode::Never).is_err());
    }

    fn applied_copy_row(store: &Store, rel_path: &str, hash: u64) {
        store
            .upsert_scanned(&[crate::model::ScannedEntry {
                rel_path: rel_path.into(),
                side: Side::A,
                kind: crate::model::Kind::File,
                size: Some(5),
                mtime: Some(1),
                link_target: None,
            }])
            .unwrap();
        store.set_hash(rel_path, Side::A, hash).unwrap();
        store.set_action(rel_path, &Action::CopyFrom(Side::A)).unwrap();
        store.set_status(rel_path, Status::Applied, None).unwrap();
    }

    #[test]
    fn verify_resumed_hashes_demotes_a_row_whose_destination_diverged() {
        let dest_dir = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let store = Store::open_or_create(&store_dir.path().join("merge.db")).unwrap();

        fs::write(dest_dir.path().join("untouched.txt"), b"hello").unwrap();
        let untouched_hash = hash_file(&dest_dir.path().join("untouched.txt")).unwrap();
        applied_copy_row(&store, "untouched.txt", untouched_hash);

        fs::write(dest_dir.path().join("tampered.txt"), b"hello").unwrap();
        let original_hash = hash_file(&dest_dir.path().join("tampered.txt")).unwrap();
        applied_copy_row(&store, "tampered.txt", original_hash);
        fs::write(dest_dir.path().join("tampered.txt"), b"edited after the fact").unwrap();

        let demoted = verify_resumed_hashes(&store, dest_dir.path()).unwrap();
        assert_eq!(demoted, 1);

        let untouched = store.get("untouched.txt").unwrap().unwrap();
        assert_eq!(untouched.status, Status::Applied);

        let tampered = store.get("tampered.txt").unwrap().unwrap();
        assert_eq!(tampered.status, Status::Ready);
        assert_eq!(tampered.action, Some(Action::CopyFrom(Side::A)));
    }

    #[test]
    fn verify_resumed_hashes_demotes_a_row_whose_destination_is_missing() {
        let dest_dir = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let store = Store::open_or_create(&store_dir.path().join("merge.db")).unwrap();

        applied_copy_row(&store, "gone.txt", 0xdead_beef);

        let demoted = verify_resumed_hashes(&store, dest_dir.path()).unwrap();
        assert_eq!(demoted, 1);
        assert_eq!(store.get("gone.txt").unwrap().unwrap().status, Status::Ready);
    }
}
