//! Resumable, concurrent merge engine: merges two source trees into a
//! destination tree, persisting per-path progress so an interrupted run
//! picks back up instead of starting over.
//!
//! # Crate layout
//!
//! - [`store`] — the embedded transactional store ([`store::Store`]).
//! - [`scanner`] — the two source-tree walks.
//! - [`fingerprint`] — parallel content hashing.
//! - [`classifier`] — the pure decision table from row data to [`model::Action`].
//! - [`broker`] — serves conflicts to a [`resolver::Resolver`] in arrival order.
//! - [`resolver`] — the pluggable conflict-resolution interface.
//! - [`applier`] — executes actions against the destination.
//! - [`coordinator`] — wires everything above into one run.
//! - [`model`] — the shared data model ([`model::PathRecord`], [`model::Action`], ...).
//! - [`config`] — `treemerge.toml` configuration.
//! - [`progress`] — the progress channel and presentation helpers.
//! - [`error`] — [`error::CoreError`] and [`error::RowError`].

pub mod applier;
pub mod broker;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod progress;
pub mod resolver;
pub mod scanner;
pub mod shutdown;
pub mod store;

pub use coordinator::{install_signal_handler, RunOptions, RunOutcome, SHUTDOWN_GRACE};
pub use error::{CoreError, CoreResult, RowError};
pub use model::{Action, Choice, PathRecord, Phase, ProgressSnapshot, Run, RunMode, Side, Status};
pub use resolver::{Candidate, Resolver};
pub use shutdown::ShutdownFlag;
