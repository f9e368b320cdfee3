//! # Store - shared benchmark result store
//!
//! Lets several independent processes append timestamped benchmark results
//! into one container file without corrupting it.
//!
//! ## Architecture
//!
//! ```text
//! Worker (worker.rs)
//!   |  compute -> key -> save -> read back
//!   v
//! KeyBuilder (key.rs)  ->  group_path / YYYY.MM.DD.HHMM.SS.mmm
//!   |
//!   v
//! save (write.rs)
//!   |  acquire <file>.lock -> open container -> write -> close -> release
//!   |  (LockedContainer, locked.rs)
//!   |
//!   |  collective (collective.rs): lock-free, collective open,
//!   |  group_path = <base>/rank-<rank>
//!   v
//! traverse / read_output (read.rs)  ->  every dataset path, depth-first
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                  |
//! |----------------|----------------------------------------------------------|
//! | `lib.rs`       | `StoreError`, `SaveOptions`, `SaveOutcome`, defaults     |
//! | [`key`]        | leaf key format, `KeyBuilder`, `Address`                 |
//! | `locked`       | `LockedContainer`: lock guard + open container           |
//! | `write`        | `save()`                                                 |
//! | `collective`   | `Participant`, `CollectiveWriter`                        |
//! | `read`         | `traverse()`, `read_output()`, `read_dataset()`          |
//! | `worker`       | `Worker` compute/save/read loop                          |
//!
//! ## Guarantees
//!
//! - With locking enabled, no two `save` calls on the same file interleave
//!   their open/write/close, across threads or processes.
//! - A dataset is never overwritten: a second write to the same address is
//!   skipped with a warning and reported as [`SaveOutcome::Collision`].
//! - The lock marker is removed on every path out of `save`, error paths
//!   included.
//! - Collective writers take no lock; they rely on each participant owning
//!   a disjoint group.

mod collective;
pub mod key;
mod locked;
mod read;
mod worker;
mod write;

pub use collective::{rank_group, CollectiveWriter, Participant, RANK_ENV, WORLD_SIZE_ENV};
pub use key::{is_valid_leaf_key, key_at, Address, KeyBuilder, LEAF_KEY_FORMAT};
pub use locked::LockedContainer;
pub use read::{read_dataset, read_output, traverse, Summary, Traversal};
pub use worker::{Worker, WorkerConfig, WorkerReport, WorkerState};
pub use write::save;

pub use config::{Iterations, Settings, WriteMode};

use config::ConfigError;
use container::{ContainerError, ContainerOptions};
use dataset::{DType, DatasetError};
use lockfile::{LockError, LockOptions, StalePolicy};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by store operations.
///
/// A key collision is not an error; see [`SaveOutcome::Collision`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad write mode, bad option combination, bad participant, bad key.
    /// Raised before any I/O.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// The container refused the dataset.
    #[error("failing to serialize type {dtype} ({preview}): {source}")]
    Serialization {
        dtype: DType,
        preview: String,
        #[source]
        source: ContainerError,
    },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        StoreError::InvalidConfiguration(e.to_string())
    }
}

/// What `save` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// Something already lived at the address; nothing was written.
    Collision,
}

/// How `save` locks and opens the container.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub lock_enabled: bool,
    pub write_mode: WriteMode,
    pub open_options: ContainerOptions,
    /// Probe interval, limits and stale policy. `enabled` is taken from
    /// `lock_enabled`.
    pub lock_options: LockOptions,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            lock_enabled: true,
            write_mode: WriteMode::Append,
            open_options: ContainerOptions::synced(),
            lock_options: LockOptions::default(),
        }
    }
}

impl SaveOptions {
    /// Lock-free collective append.
    pub fn collective() -> Self {
        Self {
            lock_enabled: false,
            write_mode: WriteMode::Append,
            open_options: ContainerOptions::collective(),
            lock_options: LockOptions::disabled(),
        }
    }

    /// Exclusive append without the advisory lock.
    pub fn unlocked() -> Self {
        Self {
            lock_enabled: false,
            ..Self::default()
        }
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.open_options.sync = sync;
        self
    }

    /// Locked save options built from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut lock_options =
            LockOptions::default().with_probe_interval(settings.probe_interval);
        if let Some(attempts) = settings.lock_attempts {
            lock_options = lock_options.with_max_attempts(attempts);
        }
        if let Some(timeout) = settings.lock_timeout {
            lock_options = lock_options.with_timeout(timeout);
        }
        if let Some(age) = settings.stale_after {
            lock_options = lock_options.with_stale_policy(StalePolicy::MaxAge(age));
        }

        Self {
            lock_enabled: settings.lock,
            write_mode: settings.write_mode,
            open_options: ContainerOptions {
                sync: settings.sync,
                ..ContainerOptions::default()
            },
            lock_options,
        }
    }

    /// The lock options `save` actually uses.
    pub(crate) fn effective_lock_options(&self) -> LockOptions {
        LockOptions {
            enabled: self.lock_enabled,
            ..self.lock_options.clone()
        }
    }

    /// The container options `save` actually uses. Without the lock other
    /// writers may be mid-append, so the open must not cut a torn tail.
    pub(crate) fn effective_open_options(&self) -> ContainerOptions {
        ContainerOptions {
            shared: self.open_options.shared || !self.lock_enabled,
            ..self.open_options.clone()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.write_mode == WriteMode::Truncate && self.open_options.collective {
            return Err(StoreError::InvalidConfiguration(
                "truncate cannot be combined with a collective open".to_string(),
            ));
        }
        Ok(())
    }
}

/// `output.bsc` in the current working directory.
pub fn default_filename() -> PathBuf {
    match std::env::current_dir() {
        Ok(dir) => dir.join(config::DEFAULT_FILENAME),
        Err(_) => PathBuf::from(config::DEFAULT_FILENAME),
    }
}

#[cfg(test)]
mod tests;
