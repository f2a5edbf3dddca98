//! `treemerge` library crate — re-exports the engine's public surface.
//!
//! The primary interface is the `treemerge` CLI binary (in the
//! `treemerge-cli` crate, built on top of `treemerge-core`). This crate
//! exists so the engine can also be embedded directly, without shelling
//! out to the CLI.

pub use treemerge_core::*;
