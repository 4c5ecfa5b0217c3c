//! Storage Layer
//!
//! Manages the recording archive directory: age-based and free-space
//! eviction, filesystem space probing, and moving finalized recordings out
//! of staging.

mod manager;
mod space;

pub use manager::{EvictionReport, StorageManager};
pub use space::{SpaceProbe, StatvfsProbe, StorageState};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Filesystem error on {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Staged recording {0} has no file name")]
    InvalidPath(PathBuf),
    #[error("No free archive name for {0}")]
    NameCollision(PathBuf),
}

impl StorageError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::FileSystem {
            path: path.into(),
            source,
        }
    }
}

/// Eviction policy applied at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Run eviction at all
    pub clear_space: bool,
    /// Delete archived recordings older than this many days
    pub max_age_days: u64,
    /// Free-space level (GB) below which the oldest recordings are dropped
    pub low_space_threshold_gb: f64,
    /// How many recordings to drop when space is low
    pub evict_batch: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            clear_space: true,
            max_age_days: 7,
            low_space_threshold_gb: 5.0,
            evict_batch: 3,
        }
    }
}

impl EvictionPolicy {
    /// Maximum archive age as a duration
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days.saturating_mul(24 * 60 * 60))
    }
}
