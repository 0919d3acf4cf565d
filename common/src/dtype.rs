//! Element datatypes and the native-type mapping.
//!
//! Both runtimes tag buffers with a small integer enum, but the two enums
//! disagree on the numbering. [`DataType`] is the shared vocabulary and
//! converts to and from either encoding.

use crate::error::TensorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element datatype of a tensor buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    String,
    Half,
    BFloat16,
    Complex64,
    Complex128,
}

impl DataType {
    /// Size of one element in bytes, `None` for variable-length types
    pub fn size_of(self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => Some(1),
            Self::Int16 | Self::UInt16 | Self::Half | Self::BFloat16 => Some(2),
            Self::Float | Self::Int32 | Self::UInt32 => Some(4),
            Self::Double | Self::Int64 | Self::UInt64 | Self::Complex64 => Some(8),
            Self::Complex128 => Some(16),
            Self::String => None,
        }
    }

    /// Value of the matching `TF_DataType` constant
    pub fn to_tf(self) -> i32 {
        match self {
            Self::Float => 1,
            Self::Double => 2,
            Self::Int32 => 3,
            Self::UInt8 => 4,
            Self::Int16 => 5,
            Self::Int8 => 6,
            Self::String => 7,
            Self::Complex64 => 8,
            Self::Int64 => 9,
            Self::Bool => 10,
            Self::BFloat16 => 14,
            Self::UInt16 => 17,
            Self::Complex128 => 18,
            Self::Half => 19,
            Self::UInt32 => 22,
            Self::UInt64 => 23,
        }
    }

    /// Parse a `TF_DataType` value
    pub fn from_tf(raw: i32) -> Result<Self, TensorError> {
        Ok(match raw {
            1 => Self::Float,
            2 => Self::Double,
            3 => Self::Int32,
            4 => Self::UInt8,
            5 => Self::Int16,
            6 => Self::Int8,
            7 => Self::String,
            8 => Self::Complex64,
            9 => Self::Int64,
            10 => Self::Bool,
            14 => Self::BFloat16,
            17 => Self::UInt16,
            18 => Self::Complex128,
            19 => Self::Half,
            22 => Self::UInt32,
            23 => Self::UInt64,
            other => return Err(TensorError::UnknownDataType(other)),
        })
    }

    /// Value of the matching `TfLiteType` constant
    pub fn to_tflite(self) -> i32 {
        match self {
            Self::Float => 1,
            Self::Int32 => 2,
            Self::UInt8 => 3,
            Self::Int64 => 4,
            Self::String => 5,
            Self::Bool => 6,
            Self::Int16 => 7,
            Self::Complex64 => 8,
            Self::Int8 => 9,
            Self::Half => 10,
            Self::Double => 11,
            Self::Complex128 => 12,
            Self::UInt64 => 13,
            Self::UInt32 => 16,
            Self::UInt16 => 17,
            // TFLite has no bfloat16 tag
            Self::BFloat16 => 0,
        }
    }

    /// Parse a `TfLiteType` value
    pub fn from_tflite(raw: i32) -> Result<Self, TensorError> {
        Ok(match raw {
            1 => Self::Float,
            2 => Self::Int32,
            3 => Self::UInt8,
            4 => Self::Int64,
            5 => Self::String,
            6 => Self::Bool,
            7 => Self::Int16,
            8 => Self::Complex64,
            9 => Self::Int8,
            10 => Self::Half,
            11 => Self::Double,
            12 => Self::Complex128,
            13 => Self::UInt64,
            16 => Self::UInt32,
            17 => Self::UInt16,
            other => return Err(TensorError::UnknownDataType(other)),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float => "float32",
            Self::Double => "float64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Half => "float16",
            Self::BFloat16 => "bfloat16",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
        };
        f.write_str(name)
    }
}

/// Native element types that can be stored in a tensor buffer.
///
/// Implemented for `f32`, `f64`, `i8`, `i16`, `i32`, `i64`, `u8` and `bool`.
/// Using any other type with the tensor constructors is rejected at compile
/// time.
pub trait TensorElement: Copy + Send + Sync + 'static {
    /// Runtime tag for this type
    const DATA_TYPE: DataType;

    /// Append the native-endian bytes of `self` to `out`
    fn write_bytes(self, out: &mut Vec<u8>);

    /// Read one element; `bytes` is exactly one element long
    fn read_bytes(bytes: &[u8]) -> Self;
}

macro_rules! numeric_element {
    ($ty:ty, $tag:expr) => {
        impl TensorElement for $ty {
            const DATA_TYPE: DataType = $tag;

            fn write_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }
        }
    };
}

numeric_element!(f32, DataType::Float);
numeric_element!(f64, DataType::Double);
numeric_element!(i8, DataType::Int8);
numeric_element!(i16, DataType::Int16);
numeric_element!(i32, DataType::Int32);
numeric_element!(i64, DataType::Int64);
numeric_element!(u8, DataType::UInt8);

impl TensorElement for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn write_bytes(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Encode a slice of native values into a runtime buffer
pub fn encode_elements<T: TensorElement>(values: &[T]) -> Vec<u8> {
    let width = T::DATA_TYPE.size_of().unwrap_or(0);
    let mut out = Vec::with_capacity(values.len() * width);
    for value in values {
        value.write_bytes(&mut out);
    }
    out
}

/// Decode a runtime buffer tagged `actual` into native values.
///
/// Fails with [`TensorError::TypeMismatch`] when `T` does not match the
/// buffer's tag instead of reinterpreting the bytes.
pub fn decode_elements<T: TensorElement>(
    bytes: &[u8],
    actual: DataType,
) -> Result<Vec<T>, TensorError> {
    if actual != T::DATA_TYPE {
        return Err(TensorError::TypeMismatch {
            expected: T::DATA_TYPE,
            actual,
        });
    }
    let width = actual
        .size_of()
        .ok_or(TensorError::VariableLength(actual))?;
    if bytes.len() % width != 0 {
        return Err(TensorError::ByteLength {
            dtype: actual,
            len: bytes.len(),
        });
    }
    Ok(bytes.chunks_exact(width).map(T::read_bytes).collect())
}

/// Number of elements described by `dims`; a 0-D shape holds one element
pub fn element_count(dims: &[i64]) -> usize {
    dims.iter().map(|&d| d.max(0) as usize).product()
}
