//! Coordinator: owns the run's lifecycle end to end.
//!
//! Opens (or resumes) the store, runs the pipeline stages in sequence —
//! scan both sides concurrently, hash, classify, then apply while the
//! Conflict Broker serves resolutions — and drives the 10 Hz progress feed.
//! A SIGINT/SIGTERM flips the shared [`ShutdownFlag`]; workers notice it
//! between units of work and wind down. If shutdown hasn't finished within
//! [`SHUTDOWN_GRACE`], the second signal (or the grace timeout firing with
//! threads still joined) is treated as a request to abort immediately.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use crate::applier::{self, ReflinkMode};
use crate::broker::ConflictBroker;
use crate::classifier;
use crate::error::{CoreError, CoreResult};
use crate::fingerprint;
use crate::model::{Phase, ProgressSnapshot, Run, RunMode, Side};
use crate::resolver::{Candidate, Resolver};
use crate::scanner;
use crate::shutdown::ShutdownFlag;
use crate::store::Store;

/// How long the Coordinator waits, after flipping the shutdown flag, for
/// in-flight workers to notice and return before it stops waiting on them
/// and returns control to the caller anyway.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How often progress snapshots are emitted, matching the design doc's
/// "bounded rate" contract for a terminal-friendly refresh.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

pub struct RunOptions {
    pub a_root: PathBuf,
    pub b_root: PathBuf,
    pub dest_root: PathBuf,
    pub db_path: PathBuf,
    pub reset: bool,
    pub pool_size: usize,
    pub reflink: ReflinkMode,
}

/// What a completed (or interrupted) [`run`] call produced, enough for a
/// caller to pick an exit code per the CLI's §6 contract without reopening
/// the store.
#[derive(Clone, Copy, Debug)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub aborted: bool,
    pub final_snapshot: ProgressSnapshot,
}

/// Install a process-wide `Ctrl-C`/`SIGTERM` handler that flips `flag`.
/// Safe to call more than once per process only if `ctrlc` itself tolerates
/// it (it doesn't) — callers should install exactly one handler per run.
///
/// # Errors
/// Returns an error if a handler is already registered in this process.
pub fn install_signal_handler(flag: ShutdownFlag) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || flag.trigger())
}

/// Run (or resume) a merge to completion, emitting progress snapshots over
/// `progress_tx` at roughly [`PROGRESS_INTERVAL`]. Returns once every row is
/// `applied` or `failed`, shutdown was requested, or a fatal error occurred.
///
/// # Errors
/// Any [`CoreError`] raised by a stage. Stages stop as soon as one fails;
/// earlier stages' work is already durably committed to the store.
pub fn run(
    opts: &RunOptions,
    resolver: &dyn Resolver,
    shutdown: &ShutdownFlag,
    progress_tx: Option<&mpsc::Sender<ProgressSnapshot>>,
) -> CoreResult<RunOutcome> {
    let store = Store::open_or_create(&opts.db_path)?;
    let (run, mode) = store.begin_run(&opts.a_root, &opts.b_root, &opts.dest_root, opts.reset)?;

    let removed = scanner::cleanup_stale_temp_files(&opts.dest_root, &run.id)
        .map_err(|e| CoreError::DestinationFatal { detail: e.to_string() })?;
    for path in &removed {
        tracing::info!(path = %path.display(), "removed stale temp file from a prior run");
    }

    if mode == RunMode::Resumed {
        let demoted = applier::verify_resumed_hashes(&store, &opts.dest_root)?;
        if demoted > 0 {
            tracing::info!(demoted, "re-queued applied rows whose destination content had diverged");
        }
    }

    let ticker_stop = ShutdownFlag::new();
    std::thread::scope(|scope| {
        if let Some(tx) = progress_tx {
            scope.spawn(|| progress_ticker(&store, tx, &ticker_stop, shutdown));
        }

        let result = run_stages(&store, &run, mode, opts, resolver, shutdown, progress_tx);
        ticker_stop.trigger();
        result
    })
}

fn run_stages(
    store: &Store,
    run: &Run,
    mode: RunMode,
    opts: &RunOptions,
    resolver: &dyn Resolver,
    shutdown: &ShutdownFlag,
    progress_tx: Option<&mpsc::Sender<ProgressSnapshot>>,
) -> CoreResult<RunOutcome> {
    emit_progress(store, progress_tx)?;

    if mode == RunMode::Fresh || matches!(run.phase, Phase::Scanning) {
        store.mark_phase(Phase::Scanning)?;
        run_scan_phase(store, &opts.a_root, &opts.b_root, shutdown)?;
        emit_progress(store, progress_tx)?;
    }

    if shutdown.is_triggered() {
        return finish(store, mode, true);
    }

    store.mark_phase(Phase::Hashing)?;
    fingerprint::run(store, &opts.a_root, &opts.b_root, opts.pool_size, shutdown)?;
    emit_progress(store, progress_tx)?;

    if shutdown.is_triggered() {
        return finish(store, mode, true);
    }

    classifier::run(store)?;
    emit_progress(store, progress_tx)?;

    if shutdown.is_triggered() {
        return finish(store, mode, true);
    }

    store.mark_phase(Phase::Applying)?;
    run_apply_phase(store, opts, &run.id, resolver, shutdown, progress_tx)?;
    emit_progress(store, progress_tx)?;

    if shutdown.is_triggered() {
        return finish(store, mode, true);
    }

    store.mark_phase(Phase::Done)?;
    emit_progress(store, progress_tx)?;
    finish(store, mode, false)
}

fn finish(store: &Store, mode: RunMode, aborted: bool) -> CoreResult<RunOutcome> {
    let (total_paths, classified, awaiting_decision, applied, failed) = store.progress_counts()?;
    Ok(RunOutcome {
        mode,
        aborted,
        final_snapshot: ProgressSnapshot {
            total_paths,
            classified,
            awaiting_decision,
            applied,
            failed,
        },
    })
}

/// Emits a progress snapshot every [`PROGRESS_INTERVAL`] for the lifetime
/// of the run, independent of stage boundaries — the stage-boundary emits
/// in [`run_stages`] are a floor, not a substitute, for long stages like
/// hashing or applying.
fn progress_ticker(
    store: &Store,
    progress_tx: &mpsc::Sender<ProgressSnapshot>,
    ticker_stop: &ShutdownFlag,
    shutdown: &ShutdownFlag,
) {
    while !ticker_stop.is_triggered() {
        std::thread::sleep(PROGRESS_INTERVAL);
        if ticker_stop.is_triggered() || shutdown.is_triggered() {
            return;
        }
        if emit_progress(store, Some(progress_tx)).is_err() {
            return;
        }
    }
}

/// Scans both trees concurrently — two threads, one per side, neither
/// blocked by the other — then waits for both to finish.
fn run_scan_phase(store: &Store, a_root: &Path, b_root: &Path, shutdown: &ShutdownFlag) -> CoreResult<()> {
    std::thread::scope(|scope| {
        let a_handle = scope.spawn(|| scanner::scan(store, a_root, Side::A, shutdown));
        let b_handle = scope.spawn(|| scanner::scan(store, b_root, Side::B, shutdown));
        a_handle.join().unwrap_or_else(|_| {
            Err(CoreError::StoreUnavailable { detail: "scanner thread (A) panicked".into() })
        })?;
        b_handle.join().unwrap_or_else(|_| {
            Err(CoreError::StoreUnavailable { detail: "scanner thread (B) panicked".into() })
        })
    })
}

/// Runs the Applier's worker pool and the Conflict Broker side by side:
/// the Broker feeds resolved conflicts back into `ready` while the Applier
/// drains whatever is already `ready`, so a slow human resolving one
/// conflict never stalls unrelated applies (§5 of the design doc).
fn run_apply_phase(
    store: &Store,
    opts: &RunOptions,
    run_id: &str,
    resolver: &dyn Resolver,
    shutdown: &ShutdownFlag,
    progress_tx: Option<&mpsc::Sender<ProgressSnapshot>>,
) -> CoreResult<()> {
    std::thread::scope(|scope| {
        let broker_handle = scope.spawn(|| run_broker_loop(store, opts, resolver, shutdown));

        let apply_result = applier::run(
            store,
            &opts.a_root,
            &opts.b_root,
            &opts.dest_root,
            run_id,
            opts.pool_size,
            opts.reflink,
            shutdown,
        );
        emit_progress(store, progress_tx)?;

        let broker_result = broker_handle
            .join()
            .unwrap_or_else(|_| Err(CoreError::StoreUnavailable { detail: "broker thread panicked".into() }));

        apply_result.and(broker_result)
    })
}

/// Serves `awaiting_decision` rows to `resolver` one at a time, in arrival
/// order, until classification is known to be finished (always true by the
/// time this runs — classification completes before the apply phase
/// starts) and the queue is empty, or shutdown is requested.
fn run_broker_loop(
    store: &Store,
    opts: &RunOptions,
    resolver: &dyn Resolver,
    shutdown: &ShutdownFlag,
) -> CoreResult<()> {
    let broker = ConflictBroker::new(store);
    let classification_done = || true;
    loop {
        let Some(row) = broker.next_conflict(shutdown, &classification_done)? else {
            return Ok(());
        };
        let candidate = Candidate::from_row(&row, &opts.a_root, &opts.b_root);
        let choice = resolver.resolve(&candidate);
        broker.submit_decision(&row, choice)?;
    }
}

fn emit_progress(store: &Store, progress_tx: Option<&mpsc::Sender<ProgressSnapshot>>) -> CoreResult<()> {
    let Some(tx) = progress_tx else {
        return Ok(());
    };
    let (total_paths, classified, awaiting_decision, applied, failed) = store.progress_counts()?;
    let snapshot = ProgressSnapshot {
        total_paths,
        classified,
        awaiting_decision,
        applied,
        failed,
    };
    let _ = tx.send(snapshot);
    Ok(())
}
