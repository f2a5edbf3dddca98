//! Merge engine configuration (`treemerge.toml`).
//!
//! Parsed from an optional config file next to the destination root, or
//! from `--config PATH`. Missing file -> all defaults (no error), in the
//! same style as the teacher's `ManifoldConfig`.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::applier::ReflinkMode;
use crate::model::Choice;

/// Top-level treemerge configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TreemergeConfig {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub conflicts: ConflictConfig,
}

impl TreemergeConfig {
    /// Load from `path`, or return all-defaults if it doesn't exist.
    ///
    /// # Errors
    /// Returns a description of the parse failure if `path` exists but
    /// isn't valid TOML, or contains an unknown field.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// Worker-pool sizing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Fingerprinter worker-pool size. Defaults to the physical core count.
    #[serde(default = "default_fingerprint_pool_size")]
    pub fingerprint_pool_size: usize,

    /// Applier worker-pool size. Defaults to the same as the Fingerprinter.
    #[serde(default = "default_apply_pool_size")]
    pub apply_pool_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            fingerprint_pool_size: default_fingerprint_pool_size(),
            apply_pool_size: default_apply_pool_size(),
        }
    }
}

fn default_fingerprint_pool_size() -> usize {
    crate::fingerprint::default_pool_size()
}

fn default_apply_pool_size() -> usize {
    crate::applier::default_pool_size()
}

/// Store-level tuning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Rows per commit during scanning. Larger batches amortize fsync cost
    /// at the expense of more redone work if a batch is interrupted.
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            commit_batch_size: default_commit_batch_size(),
        }
    }
}

const fn default_commit_batch_size() -> usize {
    256
}

/// Conflict-handling defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictConfig {
    /// Policy used when no interactive resolver is attached
    /// (`--on-conflict`). `None` means conflicts require a human.
    #[serde(default)]
    pub default_choice: Option<ChoiceConfig>,

    /// Whether the Applier attempts copy-on-write reflinks before falling
    /// back to a plain copy.
    #[serde(default)]
    pub reflink: ReflinkModeConfig,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            default_choice: None,
            reflink: ReflinkModeConfig::default(),
        }
    }
}

/// Serde-friendly mirror of [`Choice`] restricted to the two non-interactive
/// variants a config file can reasonably name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceConfig {
    PreferNewer,
    PreferOlder,
}

impl From<ChoiceConfig> for Choice {
    fn from(c: ChoiceConfig) -> Self {
        match c {
            ChoiceConfig::PreferNewer => Self::PreferNewer,
            ChoiceConfig::PreferOlder => Self::PreferOlder,
        }
    }
}

/// Serde-friendly mirror of [`ReflinkMode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReflinkModeConfig {
    #[default]
    Never,
    Auto,
}

impl From<ReflinkModeConfig> for ReflinkMode {
    fn from(m: ReflinkModeConfig) -> Self {
        match m {
            ReflinkModeConfig::Never => Self::Never,
            ReflinkModeConfig::Auto => Self::Auto,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: std::path::PathBuf, detail: String },
    Parse { path: std::path::PathBuf, detail: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, detail } => write!(f, "failed to read {}: {detail}", path.display()),
            Self::Parse { path, detail } => write!(f, "failed to parse {}: {detail}", path.display()),
        }
    }
}

impl std::error::Error for ConfigError {}
