//! Container binary format: file header and record framing.
//!
//! ## Header (8 bytes)
//!
//! ```text
//! [magic: u32 LE = "BSC1"][version: u32 LE]
//! ```
//!
//! ## Record frame
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! `record_len` includes the 4-byte CRC but not itself. The CRC covers the
//! body only.
//!
//! Body (group):   `[op=0: u8][path_len: u32][path]`
//! Body (dataset): `[op=1: u8][path_len: u32][path][tag_len: u8][tag]`
//!                 `[ndim: u8][dim: u64 x ndim][data_len: u64][data]`

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use dataset::{DType, Dataset};
use hierarchy::DatasetEntry;
use std::io::{self, Read, Write};

use crate::ContainerError;

/// Magic number identifying a container file (ASCII "BSC1").
pub const MAGIC: u32 = 0x4253_4331;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the file header in bytes: 4 (`magic`) + 4 (`version`).
pub const HEADER_BYTES: u64 = 4 + 4;

/// Size of the frame prefix in bytes: 4 (`record_len`) + 4 (`crc32`).
pub const FRAME_PREFIX_BYTES: u64 = 4 + 4;

/// Largest accepted `record_len`. Anything bigger is treated as corruption.
pub const MAX_RECORD_SIZE: u32 = 256 * 1024 * 1024;

const OP_GROUP: u8 = 0;
const OP_DATASET: u8 = 1;

pub fn write_header<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    Ok(())
}

pub fn read_header<R: Read>(r: &mut R) -> Result<(), ContainerError> {
    let magic = match r.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ContainerError::BadHeader),
        Err(e) => return Err(e.into()),
    };
    if magic != MAGIC {
        return Err(ContainerError::BadHeader);
    }
    let version = match r.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ContainerError::BadHeader),
        Err(e) => return Err(e.into()),
    };
    if version != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Encodes a group record frame into `buf` (cleared first).
pub fn encode_group(buf: &mut Vec<u8>, path: &str) -> Result<(), ContainerError> {
    let mut body = Vec::with_capacity(1 + 4 + path.len());
    body.write_u8(OP_GROUP)?;
    write_path(&mut body, path)?;
    frame(buf, &body)
}

/// Encodes a dataset record frame into `buf` (cleared first) and returns the
/// payload's offset relative to the start of the frame.
pub fn encode_dataset(buf: &mut Vec<u8>, path: &str, ds: &Dataset) -> Result<u64, ContainerError> {
    let tag = ds.dtype().tag();
    let shape = ds.shape();
    let ndim = u8::try_from(shape.len())
        .map_err(|_| ContainerError::TooLarge(shape.len() as u64))?;

    let mut body = Vec::with_capacity(64 + path.len() + ds.as_bytes().len());
    body.write_u8(OP_DATASET)?;
    write_path(&mut body, path)?;
    body.write_u8(tag.len() as u8)?;
    body.extend_from_slice(tag.as_bytes());
    body.write_u8(ndim)?;
    for dim in shape {
        body.write_u64::<LittleEndian>(*dim)?;
    }
    body.write_u64::<LittleEndian>(ds.as_bytes().len() as u64)?;
    let payload_in_body = body.len() as u64;
    body.extend_from_slice(ds.as_bytes());

    frame(buf, &body)?;
    Ok(FRAME_PREFIX_BYTES + payload_in_body)
}

fn write_path(body: &mut Vec<u8>, path: &str) -> io::Result<()> {
    body.write_u32::<LittleEndian>(path.len() as u32)?;
    body.extend_from_slice(path.as_bytes());
    Ok(())
}

fn frame(buf: &mut Vec<u8>, body: &[u8]) -> Result<(), ContainerError> {
    let record_len = body.len() as u64 + 4;
    if record_len > u64::from(MAX_RECORD_SIZE) {
        return Err(ContainerError::TooLarge(record_len));
    }

    let crc = checksum(body);

    buf.clear();
    buf.write_u32::<LittleEndian>(record_len as u32)?;
    buf.write_u32::<LittleEndian>(crc)?;
    buf.extend_from_slice(body);
    Ok(())
}

/// CRC32 of a record body.
pub fn checksum(body: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(body);
    hasher.finalize()
}

/// A decoded record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Group { path: String },
    Dataset { path: String, entry: DatasetEntry },
}

/// Decodes a verified record body. `frame_offset` is the file offset of the
/// frame, used both for error reporting and to locate the payload.
pub fn decode_body(body: &[u8], frame_offset: u64) -> Result<Decoded, ContainerError> {
    let corrupt = |_| ContainerError::Corrupt {
        offset: frame_offset,
    };

    let mut br = body;
    let op = br.read_u8().map_err(corrupt)?;
    let path = read_path(&mut br).ok_or(ContainerError::Corrupt {
        offset: frame_offset,
    })?;

    match op {
        OP_GROUP => {
            if !br.is_empty() {
                return Err(ContainerError::Corrupt {
                    offset: frame_offset,
                });
            }
            Ok(Decoded::Group { path })
        }
        OP_DATASET => {
            let tag_len = br.read_u8().map_err(corrupt)? as usize;
            let tag = take(&mut br, tag_len).ok_or(ContainerError::Corrupt {
                offset: frame_offset,
            })?;
            let dtype: DType = std::str::from_utf8(tag)
                .ok()
                .and_then(|t| t.parse().ok())
                .ok_or(ContainerError::Corrupt {
                    offset: frame_offset,
                })?;

            let ndim = br.read_u8().map_err(corrupt)? as usize;
            let mut shape = Vec::with_capacity(ndim);
            for _ in 0..ndim {
                shape.push(br.read_u64::<LittleEndian>().map_err(corrupt)?);
            }

            let data_len = br.read_u64::<LittleEndian>().map_err(corrupt)?;
            let expected = shape
                .iter()
                .try_fold(dtype.size() as u64, |acc, &d| acc.checked_mul(d));
            if br.len() as u64 != data_len || expected != Some(data_len) {
                return Err(ContainerError::Corrupt {
                    offset: frame_offset,
                });
            }

            let payload_in_body = (body.len() - br.len()) as u64;
            Ok(Decoded::Dataset {
                path,
                entry: DatasetEntry {
                    dtype,
                    shape,
                    offset: frame_offset + FRAME_PREFIX_BYTES + payload_in_body,
                    len: data_len,
                },
            })
        }
        _ => Err(ContainerError::Corrupt {
            offset: frame_offset,
        }),
    }
}

fn read_path(br: &mut &[u8]) -> Option<String> {
    let len = br.read_u32::<LittleEndian>().ok()? as usize;
    let raw = take(br, len)?;
    String::from_utf8(raw.to_vec()).ok()
}

fn take<'a>(br: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if br.len() < n {
        return None;
    }
    let (head, tail) = br.split_at(n);
    *br = tail;
    Some(head)
}
