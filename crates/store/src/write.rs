/// Write path: `save()`.
///
/// One call is one complete critical section: lock, open, write or skip,
/// close, unlock. Nothing is cached between calls, so every save sees what
/// earlier saves from any process committed.
use dataset::Dataset;
use std::path::Path;
use tracing::{debug, warn};

use crate::key::validate_leaf;
use crate::{LockedContainer, SaveOptions, SaveOutcome, StoreError};

/// Stores `data` at `group_path/leaf_key` in `filename`.
///
/// The group (and its ancestors) is created if missing. If anything already
/// lives at the address, a collision warning is logged and
/// [`SaveOutcome::Collision`] is returned; existing data is never touched.
///
/// # Errors
///
/// - [`StoreError::InvalidConfiguration`] for a bad leaf key or a truncate +
///   collective combination, before any I/O.
/// - [`StoreError::Lock`] if a configured lock limit runs out.
/// - [`StoreError::Serialization`] if the container rejects the dataset.
/// - [`StoreError::Container`] for open, group and close failures.
///
/// The lock is released on every return path.
pub fn save(
    data: &Dataset,
    filename: &Path,
    group_path: &str,
    leaf_key: &str,
    options: &SaveOptions,
) -> Result<SaveOutcome, StoreError> {
    options.validate()?;
    validate_leaf(leaf_key)?;
    hierarchy::segments(group_path)
        .map_err(|e| StoreError::InvalidConfiguration(e.to_string()))?;

    let mut locked = LockedContainer::open(
        filename,
        options.write_mode,
        options.effective_open_options(),
        &options.effective_lock_options(),
    )?;

    // `locked` drops (closing the file and removing the marker) on every
    // early return below.
    let outcome = write_into(&mut locked, data, group_path, leaf_key)?;
    locked.close()?;
    Ok(outcome)
}

fn write_into(
    locked: &mut LockedContainer,
    data: &Dataset,
    group_path: &str,
    leaf_key: &str,
) -> Result<SaveOutcome, StoreError> {
    let container = locked.container_mut();
    container.require_group(group_path)?;

    let path = hierarchy::join(group_path, leaf_key);
    if container.contains(&path) {
        warn!(key = %path, "possible collision on key, hence discard");
        return Ok(SaveOutcome::Collision);
    }

    container
        .create_dataset(&path, data)
        .map_err(|source| StoreError::Serialization {
            dtype: data.dtype(),
            preview: data.preview(),
            source,
        })?;
    debug!(key = %path, dtype = %data.dtype(), shape = ?data.shape(), "saved");
    Ok(SaveOutcome::Written)
}
