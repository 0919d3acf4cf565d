//! Runtime-independent owned tensor

use crate::dtype::{decode_elements, element_count, encode_elements, DataType, TensorElement};
use crate::error::TensorError;

/// A tensor whose buffer lives in ordinary Rust memory.
///
/// Used to move data in and out of the interpreter slots, and as the
/// detached form of a runtime tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    dtype: DataType,
    dims: Vec<i64>,
    data: Vec<u8>,
}

impl HostTensor {
    /// Build a tensor from flat values and an explicit shape.
    ///
    /// The shape is not checked against `values.len()`.
    pub fn new<T: TensorElement>(values: &[T], dims: impl Into<Vec<i64>>) -> Self {
        Self {
            dtype: T::DATA_TYPE,
            dims: dims.into(),
            data: encode_elements(values),
        }
    }

    /// 1-D tensor of `values.len()` elements
    pub fn from_slice<T: TensorElement>(values: &[T]) -> Self {
        Self::new(values, vec![values.len() as i64])
    }

    /// 0-D tensor
    pub fn scalar<T: TensorElement>(value: T) -> Self {
        Self::new(&[value], Vec::new())
    }

    /// Wrap an already encoded buffer
    pub fn from_raw_parts(dtype: DataType, dims: Vec<i64>, data: Vec<u8>) -> Self {
        Self { dtype, dims, data }
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Number of elements implied by the shape
    pub fn element_count(&self) -> usize {
        element_count(&self.dims)
    }

    /// Decode the buffer as `T`, failing if `T` is not the stored type
    pub fn to_vec<T: TensorElement>(&self) -> Result<Vec<T>, TensorError> {
        decode_elements(&self.data, self.dtype)
    }
}
