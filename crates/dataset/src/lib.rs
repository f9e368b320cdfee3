//! # Dataset - typed, shaped numeric arrays
//!
//! The payload unit of a benchstore container. A [`Dataset`] is an immutable
//! n-dimensional array stored as raw little-endian element bytes plus an
//! element-type tag and a shape.
//!
//! ## Element type tags
//!
//! Tags follow the numpy `dtype.str` convention so that containers written
//! here are self-describing:
//!
//! | Rust | Tag    | Size |
//! |------|--------|------|
//! | u8   | `\|u1` | 1    |
//! | i32  | `<i4`  | 4    |
//! | u32  | `<u4`  | 4    |
//! | i64  | `<i8`  | 8    |
//! | u64  | `<u8`  | 8    |
//! | f32  | `<f4`  | 4    |
//! | f64  | `<f8`  | 8    |
//!
//! ## Example
//!
//! ```rust
//! use dataset::{Dataset, DType};
//!
//! let ds = Dataset::new(vec![2, 3], &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
//! assert_eq!(ds.dtype(), DType::F64);
//! assert_eq!(ds.shape(), &[2, 3]);
//! assert_eq!(ds.to_vec::<f64>().unwrap()[4], 5.0);
//! ```

mod element;

pub use element::Element;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of leading elements rendered by [`Dataset::preview`].
const PREVIEW_ELEMENTS: usize = 6;

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    /// The on-disk tag (numpy `dtype.str` form).
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            DType::U8 => "|u1",
            DType::I32 => "<i4",
            DType::U32 => "<u4",
            DType::I64 => "<i8",
            DType::U64 => "<u8",
            DType::F32 => "<f4",
            DType::F64 => "<f8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DType {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "|u1" => Ok(DType::U8),
            "<i4" => Ok(DType::I32),
            "<u4" => Ok(DType::U32),
            "<i8" => Ok(DType::I64),
            "<u8" => Ok(DType::U64),
            "<f4" => Ok(DType::F32),
            "<f8" => Ok(DType::F64),
            other => Err(DatasetError::UnknownTag(other.to_string())),
        }
    }
}

/// Errors raised while building or decoding a dataset.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    /// The number of elements (or bytes) does not match the shape.
    #[error("shape {shape:?} expects {expected} bytes of {dtype}, got {actual}")]
    ShapeMismatch {
        dtype: DType,
        shape: Vec<u64>,
        expected: u64,
        actual: u64,
    },

    /// The caller asked for a different element type than the one stored.
    #[error("type mismatch: stored {stored}, requested {requested}")]
    TypeMismatch { stored: DType, requested: DType },

    /// An element-type tag that this crate does not understand.
    #[error("unknown element type tag {0:?}")]
    UnknownTag(String),
}

/// An immutable n-dimensional numeric array.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    dtype: DType,
    shape: Vec<u64>,
    bytes: Vec<u8>,
}

impl Dataset {
    /// Builds a dataset from typed values laid out in row-major order.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::ShapeMismatch`] if `values.len()` is not the
    /// product of `shape`.
    pub fn new<T: Element>(shape: Vec<u64>, values: &[T]) -> Result<Self, DatasetError> {
        let mut bytes = Vec::with_capacity(values.len() * T::DTYPE.size());
        T::encode_into(values, &mut bytes);
        Self::from_raw(T::DTYPE, shape, bytes)
    }

    /// Builds a one-dimensional dataset.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * T::DTYPE.size());
        T::encode_into(values, &mut bytes);
        Self {
            dtype: T::DTYPE,
            shape: vec![values.len() as u64],
            bytes,
        }
    }

    /// Wraps already-encoded little-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::ShapeMismatch`] if the byte count disagrees
    /// with `shape` and `dtype`.
    pub fn from_raw(dtype: DType, shape: Vec<u64>, bytes: Vec<u8>) -> Result<Self, DatasetError> {
        let expected = expected_bytes(dtype, &shape);
        if expected != Some(bytes.len() as u64) {
            return Err(DatasetError::ShapeMismatch {
                dtype,
                expected: expected.unwrap_or(u64::MAX),
                actual: bytes.len() as u64,
                shape,
            });
        }
        Ok(Self {
            dtype,
            shape,
            bytes,
        })
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Raw little-endian element bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.dtype.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the elements as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::TypeMismatch`] unless `T` is exactly the stored
    /// element type; values are never coerced.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, DatasetError> {
        if T::DTYPE != self.dtype {
            return Err(DatasetError::TypeMismatch {
                stored: self.dtype,
                requested: T::DTYPE,
            });
        }
        Ok(T::decode(&self.bytes))
    }

    /// Short human-readable rendering of the first few elements, used in
    /// diagnostics when a write fails.
    #[must_use]
    pub fn preview(&self) -> String {
        let shown = self.len().min(PREVIEW_ELEMENTS);
        let size = self.dtype.size();
        let mut parts: Vec<String> = (0..shown)
            .map(|i| element::render(self.dtype, &self.bytes[i * size..(i + 1) * size]))
            .collect();
        if self.len() > shown {
            parts.push("...".to_string());
        }
        format!("{:?} [{}]", self.shape, parts.join(", "))
    }
}

/// `product(shape) * element_size`, or `None` on overflow.
fn expected_bytes(dtype: DType, shape: &[u64]) -> Option<u64> {
    shape
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_mul(dtype.size() as u64))
}
