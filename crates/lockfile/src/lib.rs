//! # Lockfile - advisory cross-process write lock
//!
//! Serializes writers of one container file across processes. The lock is a
//! zero-byte marker file next to the container:
//!
//! ```text
//! output.bsc        <- the container
//! output.bsc.lock   <- exists iff some process holds write access
//! ```
//!
//! The marker is created with exclusive-create semantics (`O_CREAT|O_EXCL`),
//! which fails atomically if another process already holds it. On contention
//! the caller sleeps `probe_interval` and tries again.
//!
//! ## Liveness
//!
//! With default options acquisition retries **forever**. A process that dies
//! while holding the lock leaves the marker behind and every later writer
//! spins until the marker is removed. Set `max_attempts` or `timeout` to turn
//! that stall into [`LockError::Timeout`], and pick a [`StalePolicy`] to decide
//! who clears an abandoned marker.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lockfile::{acquire, LockOptions};
//! use std::path::Path;
//!
//! let guard = acquire(Path::new("output.bsc"), &LockOptions::default()).unwrap();
//! // exclusive access to output.bsc
//! guard.release().unwrap();
//! ```

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Suffix appended to the protected file's name to form the marker path.
pub const LOCK_SUFFIX: &str = ".lock";

/// Default sleep between contended attempts.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that can occur while taking or dropping the lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The marker could not be created or removed for a reason other than
    /// contention.
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Gave up after the configured attempt or time budget.
    #[error("timed out waiting for {path} after {attempts} attempts ({waited:?})")]
    Timeout {
        path: PathBuf,
        attempts: u32,
        waited: Duration,
    },
}

/// What to do with a marker left behind by a process that never released it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Never clear a marker automatically. An operator removes it by hand
    /// (see [`force_unlock`]).
    #[default]
    Manual,
    /// Treat a marker whose modification time is older than this as
    /// abandoned: remove it and retry immediately.
    MaxAge(Duration),
}

/// Acquisition settings.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// When `false`, [`acquire`] returns an inert guard without touching the
    /// filesystem.
    pub enabled: bool,
    pub probe_interval: Duration,
    /// Give up after this many contended attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed. `None` waits forever.
    pub timeout: Option<Duration>,
    pub stale: StalePolicy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            max_attempts: None,
            timeout: None,
            stale: StalePolicy::Manual,
        }
    }
}

impl LockOptions {
    /// Options for callers that coordinate some other way.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stale_policy(mut self, stale: StalePolicy) -> Self {
        self.stale = stale;
        self
    }
}

/// One failed attempt, reported to the observer passed to [`acquire_with`].
#[derive(Debug, Clone, Copy)]
pub struct Contention<'a> {
    pub lock_path: &'a Path,
    /// 1-based count of failed attempts so far.
    pub attempt: u32,
    pub waited: Duration,
}

/// Proof of exclusive access. Dropping the guard removes the marker.
#[derive(Debug)]
pub struct LockGuard {
    /// `None` for a disabled lock or after release.
    path: Option<PathBuf>,
    contended: u32,
}

impl LockGuard {
    fn inert() -> Self {
        Self {
            path: None,
            contended: 0,
        }
    }

    /// Marker path, if this guard holds a real lock.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_held(&self) -> bool {
        self.path.is_some()
    }

    /// How many times acquisition found the lock taken before succeeding.
    pub fn contended_attempts(&self) -> u32 {
        self.contended
    }

    /// Removes the marker and reports any failure, unlike `Drop`.
    pub fn release(mut self) -> Result<(), LockError> {
        match self.path.take() {
            Some(path) => remove_marker(&path),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = remove_marker(&path) {
                warn!(error = %e, "failed to release lock");
            }
        }
    }
}

/// Marker path for `target`: the full file name plus [`LOCK_SUFFIX`].
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Blocks until the lock for `target` is held (or the configured budget runs
/// out).
pub fn acquire(target: &Path, options: &LockOptions) -> Result<LockGuard, LockError> {
    acquire_with(target, options, |_| {})
}

/// Like [`acquire`], calling `on_contention` after every failed attempt,
/// before sleeping.
pub fn acquire_with<F>(
    target: &Path,
    options: &LockOptions,
    mut on_contention: F,
) -> Result<LockGuard, LockError>
where
    F: FnMut(&Contention<'_>),
{
    if !options.enabled {
        return Ok(LockGuard::inert());
    }

    let lock_path = lock_path_for(target);
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_file) => {
                debug!(lock = %lock_path.display(), attempts, "lock acquired");
                return Ok(LockGuard {
                    path: Some(lock_path),
                    contended: attempts,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if let StalePolicy::MaxAge(max_age) = options.stale {
                    if take_over_stale(&lock_path, max_age)? {
                        continue;
                    }
                }

                attempts = attempts.saturating_add(1);
                let waited = start.elapsed();
                let out_of_attempts = options.max_attempts.is_some_and(|max| attempts >= max);
                let out_of_time = options.timeout.is_some_and(|t| waited >= t);
                if out_of_attempts || out_of_time {
                    return Err(LockError::Timeout {
                        path: lock_path,
                        attempts,
                        waited,
                    });
                }

                info!(lock = %lock_path.display(), attempt = attempts, "sleeping");
                on_contention(&Contention {
                    lock_path: &lock_path,
                    attempt: attempts,
                    waited,
                });
                thread::sleep(options.probe_interval);
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: lock_path,
                    source,
                })
            }
        }
    }
}

/// Removes the marker for `target` regardless of who created it. Returns
/// `false` if there was no marker.
///
/// This is the manual recovery path for a stale lock; calling it while a
/// live writer holds the lock breaks mutual exclusion.
pub fn force_unlock(target: &Path) -> Result<bool, LockError> {
    let lock_path = lock_path_for(target);
    match fs::remove_file(&lock_path) {
        Ok(()) => {
            warn!(lock = %lock_path.display(), "lock removed manually");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(LockError::Io {
            path: lock_path,
            source,
        }),
    }
}

/// Age of the marker, or `None` if it vanished in the meantime.
fn marker_age(lock_path: &Path) -> Result<Option<Duration>, LockError> {
    let modified = match fs::metadata(lock_path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockError::Io {
                path: lock_path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    ))
}

/// Removes the marker if it is older than `max_age`. Returns `true` when the
/// caller should retry immediately (marker removed or already gone).
fn take_over_stale(lock_path: &Path, max_age: Duration) -> Result<bool, LockError> {
    match marker_age(lock_path)? {
        None => Ok(true),
        Some(age) if age >= max_age => {
            warn!(lock = %lock_path.display(), ?age, "removing stale lock");
            match fs::remove_file(lock_path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
                Err(source) => Err(LockError::Io {
                    path: lock_path.to_path_buf(),
                    source,
                }),
            }
        }
        Some(_) => Ok(false),
    }
}

fn remove_marker(path: &Path) -> Result<(), LockError> {
    fs::remove_file(path).map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(lock = %path.display(), "lock released");
    Ok(())
}
