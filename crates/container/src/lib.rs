//! # Container - single-file hierarchical dataset store
//!
//! A container is one file holding nested groups and immutable datasets. It
//! is stored as an append-only log of CRC-checked records; opening a
//! container replays the log into an in-memory [`Hierarchy`], and every
//! mutation appends exactly one record.
//!
//! ## Open modes
//!
//! | Mode                  | File                                   |
//! |-----------------------|----------------------------------------|
//! | [`OpenMode::ReadOnly`]| must exist                             |
//! | [`OpenMode::Append`]  | created if absent, existing data kept  |
//! | [`OpenMode::Truncate`]| replaced by an empty container         |
//!
//! [`ContainerOptions::collective`] selects the multi-writer open used when
//! several processes append at once without a lock. Collective opens never
//! truncate and never repair a torn tail, because the "torn" bytes may belong
//! to another writer's in-flight record. [`ContainerOptions::shared`] keeps
//! the tail the same way for any other open made without holding a lock.
//!
//! ## Crash safety
//!
//! - New and truncated containers appear atomically with their header
//!   (temp file + rename), so readers never see a header-less file.
//! - Each record is written with a single `write_all` on an `O_APPEND`
//!   handle. A crash mid-append leaves a torn tail, which replay treats as
//!   end-of-file. An exclusive (non-shared) append open cuts the torn tail
//!   off first.
//! - A dataset becomes visible only when its record is complete, so no
//!   partial dataset is ever observed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use container::{Container, ContainerOptions, OpenMode};
//! use dataset::Dataset;
//!
//! let mut c = Container::open("output.bsc", OpenMode::Append, ContainerOptions::default()).unwrap();
//! c.require_group("result").unwrap();
//! c.create_dataset("result/2024.01.01.0000.00.000", &Dataset::from_slice(&[1.0f64, 2.0])).unwrap();
//! c.close().unwrap();
//! ```

pub mod format;
mod replay;

pub use replay::ReplayStats;

use dataset::{Dataset, DatasetError};
use hierarchy::{Hierarchy, TreeError};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::format::HEADER_BYTES;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the container magic.
    #[error("not a container file (bad header)")]
    BadHeader,

    #[error("unsupported container format version {0}")]
    UnsupportedVersion(u32),

    /// A record failed CRC validation, had an impossible length, or could
    /// not be decoded.
    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: u64 },

    #[error("container is open read-only")]
    ReadOnly,

    /// Truncation needs exclusive access; it cannot be combined with a
    /// collective open.
    #[error("truncate is not allowed on a collective open")]
    TruncateCollective,

    #[error("record too large: {0} bytes")]
    TooLarge(u64),

    #[error("no dataset at {0:?}")]
    NotFound(String),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// Open or create, keeping existing contents.
    Append,
    /// Discard existing contents.
    Truncate,
}

/// Open-time settings beyond the mode.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    /// `fsync` the file in [`Container::close`].
    pub sync: bool,
    /// Multi-writer open: no tail repair, no truncation, and
    /// [`Container::refresh`] is expected before collision checks.
    pub collective: bool,
    /// Other processes may be appending right now (no lock is held), so a
    /// torn tail may be someone's in-flight record: never cut it.
    pub shared: bool,
}

impl ContainerOptions {
    pub fn synced() -> Self {
        Self {
            sync: true,
            collective: false,
            shared: false,
        }
    }

    pub fn collective() -> Self {
        Self {
            sync: false,
            collective: true,
            shared: true,
        }
    }
}

/// An open container.
pub struct Container {
    path: PathBuf,
    file: File,
    mode: OpenMode,
    options: ContainerOptions,
    tree: Hierarchy,
    /// Offset just past the last complete record replayed so far.
    scanned: u64,
    /// Reusable frame buffer.
    buf: Vec<u8>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("options", &self.options)
            .field("groups", &self.tree.group_count())
            .field("datasets", &self.tree.dataset_count())
            .field("scanned", &self.scanned)
            .finish()
    }
}

impl Container {
    /// Opens a container, replaying its records.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::TruncateCollective`] for `Truncate` + collective.
    /// - [`ContainerError::Io`] if a read-only target does not exist.
    /// - [`ContainerError::BadHeader`] / [`ContainerError::Corrupt`] if the
    ///   file is not a valid container.
    pub fn open<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        options: ContainerOptions,
    ) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();

        let file = match mode {
            OpenMode::ReadOnly => File::open(&path)?,
            OpenMode::Append => {
                if create_if_absent(&path)? {
                    debug!(path = %path.display(), "container created");
                }
                open_for_append(&path)?
            }
            OpenMode::Truncate => {
                if options.collective {
                    return Err(ContainerError::TruncateCollective);
                }
                replace_with_empty(&path)?;
                debug!(path = %path.display(), "container truncated");
                open_for_append(&path)?
            }
        };

        let mut container = Self {
            path,
            file,
            mode,
            options,
            tree: Hierarchy::new(),
            scanned: HEADER_BYTES,
            buf: Vec::with_capacity(256),
        };

        {
            let mut rdr = BufReader::new(&container.file);
            format::read_header(&mut rdr)?;
        }
        container.replay_from(HEADER_BYTES)?;
        container.repair_tail()?;
        Ok(container)
    }

    /// Shorthand for a read-only open.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        Self::open(path, OpenMode::ReadOnly, ContainerOptions::default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    /// The namespace as of the last replay plus this handle's own writes.
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.tree
    }

    pub fn group_exists(&self, path: &str) -> bool {
        self.tree.group_exists(path)
    }

    /// `true` if a group or dataset lives at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.tree.contains(path)
    }

    pub fn dataset_count(&self) -> usize {
        self.tree.dataset_count()
    }

    /// Every dataset path, depth-first, children in name order.
    pub fn dataset_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.tree.datasets().map(|(path, _)| path)
    }

    /// Creates `path` and its missing ancestors. Returns `true` if a record
    /// was written; an existing group is not an error.
    pub fn require_group(&mut self, path: &str) -> Result<bool, ContainerError> {
        self.ensure_writable()?;
        if !self.tree.check_group(path)? {
            return Ok(false);
        }

        let normalized = hierarchy::segments(path)?.join("/");
        format::encode_group(&mut self.buf, &normalized)?;
        self.file.write_all(&self.buf)?;
        self.advance_scanned()?;
        self.tree.require_group(&normalized)?;
        debug!(group = %normalized, "group created");
        Ok(true)
    }

    /// Appends a dataset. The parent group must exist and `path` must be
    /// free; datasets are never overwritten.
    pub fn create_dataset(&mut self, path: &str, ds: &Dataset) -> Result<(), ContainerError> {
        self.ensure_writable()?;
        self.tree.check_dataset(path)?;

        let normalized = hierarchy::segments(path)?.join("/");
        let payload_in_frame = format::encode_dataset(&mut self.buf, &normalized, ds)?;
        self.file.write_all(&self.buf)?;

        let frame_start = self.advance_scanned()?;

        self.tree.insert_dataset(
            &normalized,
            hierarchy::DatasetEntry {
                dtype: ds.dtype(),
                shape: ds.shape().to_vec(),
                offset: frame_start + payload_in_frame,
                len: ds.as_bytes().len() as u64,
            },
        )?;
        debug!(dataset = %normalized, dtype = %ds.dtype(), shape = ?ds.shape(), "dataset created");
        Ok(())
    }

    /// Loads a dataset's payload.
    pub fn read_dataset(&mut self, path: &str) -> Result<Dataset, ContainerError> {
        let entry = self
            .tree
            .dataset(path)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(path.to_string()))?;

        let mut bytes = vec![0u8; entry.len as usize];
        self.file.seek(SeekFrom::Start(entry.offset))?;
        self.file.read_exact(&mut bytes)?;
        Ok(Dataset::from_raw(entry.dtype, entry.shape, bytes)?)
    }

    /// Replays records appended by other writers since the last replay.
    /// Returns how many of them changed the namespace.
    pub fn refresh(&mut self) -> Result<usize, ContainerError> {
        let stats = self.replay_from(self.scanned)?;
        Ok(stats.applied)
    }

    /// Flushes (and with [`ContainerOptions::sync`], fsyncs) and closes.
    pub fn close(mut self) -> Result<(), ContainerError> {
        if self.mode != OpenMode::ReadOnly {
            self.file.flush()?;
            if self.options.sync {
                self.file.sync_all()?;
            }
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), ContainerError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(ContainerError::ReadOnly);
        }
        Ok(())
    }

    /// Called right after appending `self.buf`. Returns the frame's start
    /// offset and moves `scanned` past it when nothing was appended in
    /// between by another writer.
    fn advance_scanned(&mut self) -> Result<u64, ContainerError> {
        // O_APPEND leaves the handle's offset at the end of this write even
        // if other processes appended before it.
        let frame_end = self.file.stream_position()?;
        let frame_start = frame_end - self.buf.len() as u64;
        if frame_start == self.scanned {
            self.scanned = frame_end;
        }
        Ok(frame_start)
    }

    fn replay_from(&mut self, start: u64) -> Result<ReplayStats, ContainerError> {
        self.file.seek(SeekFrom::Start(start))?;
        let stats = replay::replay(&self.file, start, &mut self.tree)?;
        self.scanned = stats.end;
        debug!(
            path = %self.path.display(),
            records = stats.records,
            applied = stats.applied,
            end = stats.end,
            "replayed"
        );
        Ok(stats)
    }

    /// Cuts a torn tail record off an exclusively opened writable container
    /// so new records are not appended behind garbage.
    fn repair_tail(&mut self) -> Result<(), ContainerError> {
        if self.mode == OpenMode::ReadOnly || self.options.collective || self.options.shared {
            return Ok(());
        }
        let len = self.file.metadata()?.len();
        if len > self.scanned {
            warn!(
                path = %self.path.display(),
                torn_bytes = len - self.scanned,
                "discarding torn tail record"
            );
            self.file.set_len(self.scanned)?;
        }
        Ok(())
    }
}

fn open_for_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).append(true).open(path)
}

/// Directory a temp file for `path` should live in (same filesystem, so the
/// final rename is atomic).
fn sibling_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn empty_container_in(dir: &Path) -> io::Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    format::write_header(&mut tmp)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Creates an empty container at `path` unless something is already there.
/// Returns `true` if this call created it.
fn create_if_absent(path: &Path) -> Result<bool, ContainerError> {
    if path.exists() {
        return Ok(false);
    }
    let tmp = empty_container_in(sibling_dir(path))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        // lost the race to another creator
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

/// Atomically replaces whatever is at `path` with an empty container.
fn replace_with_empty(path: &Path) -> Result<(), ContainerError> {
    let tmp = empty_container_in(sibling_dir(path))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
