//! Little-endian encoding for the supported element types.

use byteorder::{ByteOrder, LittleEndian};

use crate::DType;

/// A primitive type that can be stored in a [`crate::Dataset`].
pub trait Element: Copy + Default + std::fmt::Display {
    /// The element type tag written next to the data.
    const DTYPE: DType;

    /// Appends `values` to `out` as little-endian bytes.
    fn encode_into(values: &[Self], out: &mut Vec<u8>);

    /// Decodes little-endian bytes. `bytes.len()` must be a multiple of the
    /// element size.
    fn decode(bytes: &[u8]) -> Vec<Self>;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;

    fn encode_into(values: &[Self], out: &mut Vec<u8>) {
        out.extend_from_slice(values);
    }

    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes.to_vec()
    }
}

macro_rules! le_element {
    ($ty:ty, $dtype:expr, $write:ident, $read:ident) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn encode_into(values: &[Self], out: &mut Vec<u8>) {
                let start = out.len();
                out.resize(start + values.len() * std::mem::size_of::<$ty>(), 0);
                LittleEndian::$write(values, &mut out[start..]);
            }

            fn decode(bytes: &[u8]) -> Vec<Self> {
                let mut values = vec![<$ty>::default(); bytes.len() / std::mem::size_of::<$ty>()];
                LittleEndian::$read(bytes, &mut values);
                values
            }
        }
    };
}

le_element!(i32, DType::I32, write_i32_into, read_i32_into);
le_element!(u32, DType::U32, write_u32_into, read_u32_into);
le_element!(i64, DType::I64, write_i64_into, read_i64_into);
le_element!(u64, DType::U64, write_u64_into, read_u64_into);
le_element!(f32, DType::F32, write_f32_into, read_f32_into);
le_element!(f64, DType::F64, write_f64_into, read_f64_into);

/// Renders one encoded element for diagnostics.
pub(crate) fn render(dtype: DType, bytes: &[u8]) -> String {
    fn first<T: Element>(bytes: &[u8]) -> String {
        T::decode(bytes)
            .first()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    match dtype {
        DType::U8 => first::<u8>(bytes),
        DType::I32 => first::<i32>(bytes),
        DType::U32 => first::<u32>(bytes),
        DType::I64 => first::<i64>(bytes),
        DType::U64 => first::<u64>(bytes),
        DType::F32 => first::<f32>(bytes),
        DType::F64 => first::<f64>(bytes),
    }
}
