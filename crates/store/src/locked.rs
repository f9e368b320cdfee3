/// `LockedContainer`: an open container together with the lock that
/// protects it.
///
/// Opening takes the lock first and the container second; closing runs in
/// the reverse order. If the container fails to open, the guard is dropped
/// on the way out and the marker disappears with it.
use container::{Container, ContainerOptions, OpenMode};
use lockfile::{LockGuard, LockOptions};
use std::path::Path;
use tracing::debug;

use crate::{StoreError, WriteMode};

/// Fields drop in declaration order: the container handle is closed before
/// the marker is removed.
#[derive(Debug)]
pub struct LockedContainer {
    container: Container,
    guard: LockGuard,
}

impl LockedContainer {
    /// Acquires the lock (unless `lock.enabled` is false) and opens
    /// `filename` for writing.
    pub fn open(
        filename: &Path,
        mode: WriteMode,
        open_options: ContainerOptions,
        lock: &LockOptions,
    ) -> Result<Self, StoreError> {
        let guard = lockfile::acquire(filename, lock)?;
        if guard.contended_attempts() > 0 {
            debug!(
                file = %filename.display(),
                attempts = guard.contended_attempts(),
                "lock acquired after contention"
            );
        }

        let open_mode = match mode {
            WriteMode::Append => OpenMode::Append,
            WriteMode::Truncate => OpenMode::Truncate,
        };
        let container = Container::open(filename, open_mode, open_options)?;
        Ok(Self { container, guard })
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    pub fn guard(&self) -> &LockGuard {
        &self.guard
    }

    /// Closes the container, then releases the lock. The lock is released
    /// even if closing fails; the close error wins.
    pub fn close(self) -> Result<(), StoreError> {
        let Self { container, guard } = self;
        let closed = container.close();
        let released = guard.release();
        closed?;
        released?;
        Ok(())
    }
}
