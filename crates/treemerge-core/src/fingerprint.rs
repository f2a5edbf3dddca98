//! Fingerprinter: a fixed worker pool computing a 64-bit content hash for
//! files that need one.
//!
//! A row needs a side's hash iff both sides are `file`, both sizes are
//! known and equal (size mismatch short-circuits straight to `conflict`
//! without hashing, handled entirely by the Classifier). Files are read in
//! chunks and folded into the hasher — never held fully in memory.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crossbeam_channel::bounded;
use xxhash_rust::xxh3::Xxh3;

use crate::error::CoreResult;
use crate::model::{Side, Status};
use crate::shutdown::ShutdownFlag;
use crate::store::{PendingFilter, Store};

const CHUNK_SIZE: usize = 256 * 1024;
const DISPATCH_BATCH: usize = 256;

struct Job {
    rel_path: String,
    side: Side,
    abs_path: PathBuf,
}

/// Default pool size: physical core count.
#[must_use]
pub fn default_pool_size() -> usize {
    num_cpus::get_physical().max(1)
}

/// Hash every row that still needs a hash on either side, using a pool of
/// `pool_size` worker threads fed by a bounded channel (capacity `4 *
/// pool_size`) — the back-pressure point named in the design doc.
///
/// Store write errors inside a worker are logged and the row is left
/// unhashed rather than aborting the whole pool; a genuinely unavailable
/// store will also fail the dispatcher's own queries and unwind `run`
/// with a fatal [`crate::error::CoreError`].
///
/// # Errors
/// Propagates [`crate::error::CoreError::StoreUnavailable`] from the store.
pub fn run(
    store: &Store,
    a_root: &Path,
    b_root: &Path,
    pool_size: usize,
    shutdown: &ShutdownFlag,
) -> CoreResult<()> {
    let pool_size = pool_size.max(1);
    let (tx, rx) = bounded::<Job>(pool_size * 4);

    std::thread::scope(|scope| {
        for _ in 0..pool_size {
            let rx = rx.clone();
            scope.spawn(|| worker_loop(store, &rx, shutdown));
        }
        drop(rx);

        let result = dispatch_loop(store, a_root, b_root, &tx, shutdown);
        drop(tx);
        result
    })
}

fn dispatch_loop(
    store: &Store,
    a_root: &Path,
    b_root: &Path,
    tx: &crossbeam_channel::Sender<Job>,
    shutdown: &ShutdownFlag,
) -> CoreResult<()> {
    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }
        let a_rows = store.iter_pending(PendingFilter::NeedsHash(Side::A), DISPATCH_BATCH)?;
        let b_rows = store.iter_pending(PendingFilter::NeedsHash(Side::B), DISPATCH_BATCH)?;
        if a_rows.is_empty() && b_rows.is_empty() {
            return Ok(());
        }
        for row in a_rows {
            let abs = a_root.join(&row.rel_path);
            let job = Job {
                rel_path: row.rel_path,
                side: Side::A,
                abs_path: abs,
            };
            if tx.send(job).is_err() {
                return Ok(());
            }
        }
        for row in b_rows {
            let abs = b_root.join(&row.rel_path);
            let job = Job {
                rel_path: row.rel_path,
                side: Side::B,
                abs_path: abs,
            };
            if tx.send(job).is_err() {
                return Ok(());
            }
        }
    }
}

fn worker_loop(store: &Store, rx: &crossbeam_channel::Receiver<Job>, shutdown: &ShutdownFlag) {
    for job in rx.iter() {
        if shutdown.is_triggered() {
            continue;
        }
        match hash_one(&job.abs_path) {
            Ok(hash) => {
                if let Err(err) = store.set_hash(&job.rel_path, job.side, hash) {
                    tracing::error!(rel_path = %job.rel_path, %err, "failed to persist hash");
                }
            }
            Err(io_err) => {
                let detail = format!("{io_err}");
                if let Err(err) = store.set_status(&job.rel_path, Status::Failed, Some(&detail)) {
                    tracing::error!(rel_path = %job.rel_path, %err, "failed to persist failure");
                }
            }
        }
    }
}

fn hash_one(path: &Path) -> std::io::Result<u64> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0_u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}
