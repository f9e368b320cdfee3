/// Record replay: rebuilds the in-memory namespace from the record log.
///
/// Replay is idempotent so that records written concurrently by collective
/// writers can be applied in any interleaving. A group record for an existing
/// group is a no-op and a dataset record for an occupied path is ignored
/// (the first record wins).
use byteorder::{LittleEndian, ReadBytesExt};
use hierarchy::{split_leaf, Hierarchy, TreeError};
use std::io::{self, BufReader, Read};
use tracing::{debug, warn};

use crate::format::{checksum, decode_body, Decoded, FRAME_PREFIX_BYTES, MAX_RECORD_SIZE};
use crate::ContainerError;

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Offset just past the last complete record.
    pub end: u64,
    /// Complete records read, applied or not.
    pub records: usize,
    /// Records that changed the tree.
    pub applied: usize,
}

/// Reads records starting at file offset `start` until EOF and applies them
/// to `tree`.
///
/// # Termination
///
/// - **Clean EOF** -> `Ok`.
/// - **Truncated tail** (partial record, e.g. crash mid-append) -> `Ok`,
///   `end` points at the start of the partial record.
/// - **CRC mismatch / bad length / unknown op** -> `Err(Corrupt)`.
pub fn replay<R: Read>(
    reader: R,
    start: u64,
    tree: &mut Hierarchy,
) -> Result<ReplayStats, ContainerError> {
    let mut rdr = BufReader::new(reader);
    let mut stats = ReplayStats {
        end: start,
        records: 0,
        applied: 0,
    };
    let mut body = Vec::with_capacity(256);

    loop {
        let frame_offset = stats.end;

        let record_len = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(stats),
            Err(e) => return Err(e.into()),
        };
        if record_len <= 4 || record_len > MAX_RECORD_SIZE {
            return Err(ContainerError::Corrupt {
                offset: frame_offset,
            });
        }

        let crc = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(stats),
            Err(e) => return Err(e.into()),
        };

        let body_len = (record_len - 4) as usize;
        body.clear();
        body.resize(body_len, 0);
        match rdr.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(stats),
            Err(e) => return Err(e.into()),
        }

        if checksum(&body) != crc {
            return Err(ContainerError::Corrupt {
                offset: frame_offset,
            });
        }

        let decoded = decode_body(&body, frame_offset)?;
        stats.records += 1;
        if apply(tree, decoded) {
            stats.applied += 1;
        }
        stats.end = frame_offset + FRAME_PREFIX_BYTES + body_len as u64;
    }
}

/// Applies one decoded record. Returns `true` if the tree changed.
fn apply(tree: &mut Hierarchy, decoded: Decoded) -> bool {
    match decoded {
        Decoded::Group { path } => match tree.require_group(&path) {
            Ok(created) => created,
            Err(e) => {
                warn!(%path, error = %e, "conflicting group record ignored");
                false
            }
        },
        Decoded::Dataset { path, entry } => {
            let (parent, _) = split_leaf(&path);
            let inserted = tree
                .require_group(parent)
                .and_then(|_| tree.insert_dataset(&path, entry));
            match inserted {
                Ok(()) => true,
                Err(TreeError::AlreadyExists(_)) => {
                    debug!(%path, "duplicate dataset record ignored");
                    false
                }
                Err(e) => {
                    warn!(%path, error = %e, "conflicting dataset record ignored");
                    false
                }
            }
        }
    }
}
