//! Eager tensors
//!
//! A [`Tensor`] is an eager handle, optionally layered over the raw buffer
//! it was created from. Cloning shares ownership; the native objects are
//! released when the last clone is dropped.

use crate::error::{Result, TfError};
use crate::ffi::{TFE_TensorHandle, TF_Tensor};
use crate::runtime::Runtime;
use crate::string;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;
use tfwrap_common::{decode_elements, encode_elements, DataType, HostTensor, Owned, TensorElement};

#[derive(Clone)]
pub struct Tensor {
    handle: Arc<Owned<TFE_TensorHandle>>,
    buffer: Option<Arc<Owned<TF_Tensor>>>,
    runtime: Arc<Runtime>,
}

impl Tensor {
    /// Build a tensor from flat values and an explicit shape.
    ///
    /// Only the byte size is derived from `values`; it is not checked
    /// against `dims`.
    ///
    /// # Example
    /// ```no_run
    /// use tf_loader::{Runtime, Tensor};
    ///
    /// let runtime = Runtime::load("libtensorflow.so")?;
    /// let input = Tensor::new(&runtime, &vec![1.0f32; 50], &[10, 5])?;
    /// # Ok::<(), tf_loader::TfError>(())
    /// ```
    pub fn new<T: TensorElement>(
        runtime: &Arc<Runtime>,
        values: &[T],
        dims: &[i64],
    ) -> Result<Self> {
        Self::from_bytes(runtime, T::DATA_TYPE, dims, &encode_elements(values))
    }

    /// 1-D tensor holding `values`
    pub fn from_slice<T: TensorElement>(runtime: &Arc<Runtime>, values: &[T]) -> Result<Self> {
        Self::new(runtime, values, &[values.len() as i64])
    }

    /// 1-D tensor from a fixed list of values
    pub fn from_array<T: TensorElement, const N: usize>(
        runtime: &Arc<Runtime>,
        values: [T; N],
    ) -> Result<Self> {
        Self::from_slice(runtime, &values)
    }

    /// 0-D tensor
    pub fn scalar<T: TensorElement>(runtime: &Arc<Runtime>, value: T) -> Result<Self> {
        Self::new(runtime, &[value], &[])
    }

    /// Copy a host tensor into runtime memory
    pub fn from_host(runtime: &Arc<Runtime>, host: &HostTensor) -> Result<Self> {
        Self::from_bytes(runtime, host.dtype(), host.dims(), host.as_bytes())
    }

    /// 0-D string tensor
    pub fn from_text(runtime: &Arc<Runtime>, text: &str) -> Result<Self> {
        Self::encode_strings(runtime, &[text.as_bytes()], &[])
    }

    /// 1-D string tensor
    pub fn from_texts<S: AsRef<str>>(runtime: &Arc<Runtime>, texts: &[S]) -> Result<Self> {
        let bodies: Vec<&[u8]> = texts.iter().map(|t| t.as_ref().as_bytes()).collect();
        Self::encode_strings(runtime, &bodies, &[texts.len() as i64])
    }

    fn encode_strings(runtime: &Arc<Runtime>, values: &[&[u8]], dims: &[i64]) -> Result<Self> {
        let codec = *runtime.functions().string_codec()?;
        // SAFETY: TF_StringEncodedSize is a pure size computation.
        let sizes: Vec<usize> = values
            .iter()
            .map(|v| unsafe { (codec.TF_StringEncodedSize)(v.len()) })
            .collect();

        let mut buffer = vec![0u8; string::buffer_len(&sizes)];
        let ranges = string::write_offsets(&mut buffer, &sizes);
        for (value, range) in values.iter().zip(ranges) {
            let dst = &mut buffer[range];
            runtime.call("TF_StringEncode", |_, status| {
                // SAFETY: src and dst are valid for their stated lengths.
                unsafe {
                    (codec.TF_StringEncode)(
                        value.as_ptr() as *const c_char,
                        value.len(),
                        dst.as_mut_ptr() as *mut c_char,
                        dst.len(),
                        status,
                    )
                }
            })?;
        }

        Self::from_bytes(runtime, DataType::String, dims, &buffer)
    }

    /// Allocate a runtime buffer, copy `bytes` into it and wrap it in an
    /// eager handle
    pub(crate) fn from_bytes(
        runtime: &Arc<Runtime>,
        dtype: DataType,
        dims: &[i64],
        bytes: &[u8],
    ) -> Result<Self> {
        let f = runtime.functions();

        // SAFETY: dims is valid for dims.len() elements; the result is
        // checked for null and released with TF_DeleteTensor.
        let buffer = unsafe {
            let raw = (f.TF_AllocateTensor)(
                dtype.to_tf(),
                dims.as_ptr(),
                dims.len() as c_int,
                bytes.len(),
            );
            Owned::from_raw(raw, f.TF_DeleteTensor, "TF_Tensor")
        }
        .ok_or(TfError::NullHandle("TF_Tensor"))?;

        if !bytes.is_empty() {
            // SAFETY: the runtime allocated exactly bytes.len() bytes.
            unsafe {
                let dst = (f.TF_TensorData)(buffer.as_ptr()) as *mut u8;
                ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            }
        }

        Self::from_buffer(runtime, buffer)
    }

    /// Wrap a runtime-owned buffer, e.g. a session output
    pub(crate) fn from_buffer(runtime: &Arc<Runtime>, buffer: Owned<TF_Tensor>) -> Result<Self> {
        let raw = runtime.call("TFE_NewTensorHandle", |f, status| {
            // SAFETY: buffer is a live tensor.
            unsafe { (f.TFE_NewTensorHandle)(buffer.as_ptr(), status) }
        })?;
        let f = runtime.functions();
        // SAFETY: raw is a fresh handle released with TFE_DeleteTensorHandle.
        let handle = unsafe { Owned::from_raw(raw, f.TFE_DeleteTensorHandle, "TFE_TensorHandle") }
            .ok_or(TfError::NullHandle("TFE_TensorHandle"))?;
        Ok(Self {
            handle: Arc::new(handle),
            buffer: Some(Arc::new(buffer)),
            runtime: Arc::clone(runtime),
        })
    }

    /// Wrap a handle produced by an eager op
    pub(crate) fn from_handle(runtime: &Arc<Runtime>, handle: Owned<TFE_TensorHandle>) -> Self {
        Self {
            handle: Arc::new(handle),
            buffer: None,
            runtime: Arc::clone(runtime),
        }
    }

    /// Resolve the eager handle into a buffer readable from the host
    pub(crate) fn resolve(&self) -> Result<Owned<TF_Tensor>> {
        let raw = self.runtime.call("TFE_TensorHandleResolve", |f, status| {
            // SAFETY: handle is live.
            unsafe { (f.TFE_TensorHandleResolve)(self.handle.as_ptr(), status) }
        })?;
        let f = self.runtime.functions();
        // SAFETY: resolve returns a new tensor owned by the caller.
        unsafe { Owned::from_raw(raw, f.TF_DeleteTensor, "TF_Tensor") }
            .ok_or(TfError::NullHandle("TF_Tensor"))
    }

    /// Shape of the tensor, computed by running the `Shape` op eagerly.
    ///
    /// This is a round-trip through the runtime; cache the result if it is
    /// needed repeatedly. The returned tensor is 1-D `int64`.
    pub fn shape(&self) -> Result<Tensor> {
        let runtime = &self.runtime;
        let f = runtime.functions();

        let raw_op = runtime.call("TFE_NewOp", |f, status| {
            // SAFETY: the context is live and the op name is NUL-terminated.
            unsafe {
                (f.TFE_NewOp)(runtime.context_ptr(), b"Shape\0".as_ptr() as *const c_char, status)
            }
        })?;
        // SAFETY: raw_op is a fresh op released with TFE_DeleteOp.
        let op = unsafe { Owned::from_raw(raw_op, f.TFE_DeleteOp, "TFE_Op") }
            .ok_or(TfError::NullHandle("TFE_Op"))?;

        runtime.call("TFE_OpAddInput", |f, status| {
            // SAFETY: op and handle are live.
            unsafe { (f.TFE_OpAddInput)(op.as_ptr(), self.handle.as_ptr(), status) }
        })?;
        // SAFETY: op is live and the attribute name is NUL-terminated.
        unsafe {
            (f.TFE_OpSetAttrType)(
                op.as_ptr(),
                b"out_type\0".as_ptr() as *const c_char,
                DataType::Int64.to_tf(),
            )
        };

        let mut retval: *mut TFE_TensorHandle = ptr::null_mut();
        let mut num_retvals: c_int = 1;
        runtime.call("TFE_Execute", |f, status| {
            // SAFETY: retval has room for num_retvals handles.
            unsafe { (f.TFE_Execute)(op.as_ptr(), &mut retval, &mut num_retvals, status) }
        })?;

        // SAFETY: Execute hands ownership of the result handle to the caller.
        let handle =
            unsafe { Owned::from_raw(retval, f.TFE_DeleteTensorHandle, "TFE_TensorHandle") }
                .ok_or(TfError::NullHandle("TFE_TensorHandle"))?;
        Ok(Tensor::from_handle(runtime, handle))
    }

    /// Dimensions read from the resolved buffer, without dispatching an op
    pub fn dims(&self) -> Result<Vec<i64>> {
        let resolved = self.resolve()?;
        Ok(self.read_dims(&resolved))
    }

    fn read_dims(&self, resolved: &Owned<TF_Tensor>) -> Vec<i64> {
        let f = self.runtime.functions();
        // SAFETY: resolved is live and indices stay below TF_NumDims.
        unsafe {
            let n = (f.TF_NumDims)(resolved.as_ptr());
            (0..n).map(|i| (f.TF_Dim)(resolved.as_ptr(), i)).collect()
        }
    }

    /// Device name for the tensor.
    ///
    /// With `on_memory == false` this is the device that produced the
    /// tensor; with `true`, the device whose memory currently holds it.
    pub fn device(&self, on_memory: bool) -> Result<String> {
        let raw = self.runtime.call("TFE_TensorHandleDeviceName", |f, status| {
            // SAFETY: handle is live; the returned string is owned by it.
            unsafe {
                if on_memory {
                    (f.TFE_TensorHandleBackingDeviceName)(self.handle.as_ptr(), status)
                } else {
                    (f.TFE_TensorHandleDeviceName)(self.handle.as_ptr(), status)
                }
            }
        })?;
        if raw.is_null() {
            return Err(TfError::NullHandle("device name"));
        }
        // SAFETY: non-null NUL-terminated string owned by the live handle.
        Ok(unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned())
    }

    /// Element datatype, read directly from the handle
    pub fn dtype(&self) -> Result<DataType> {
        let f = self.runtime.functions();
        // SAFETY: handle is live.
        let raw = unsafe { (f.TFE_TensorHandleDataType)(self.handle.as_ptr()) };
        Ok(DataType::from_tf(raw)?)
    }

    /// Copy the contents out as native values.
    ///
    /// Fails with a type mismatch if `T` is not the tensor's element type.
    pub fn get_data<T: TensorElement>(&self) -> Result<Vec<T>> {
        let resolved = self.resolve()?;
        let (dtype, bytes) = self.read_buffer(&resolved)?;
        Ok(decode_elements(bytes, dtype)?)
    }

    /// Decode a 0-D string tensor
    pub fn get_text(&self) -> Result<String> {
        let mut texts = self.get_texts()?;
        match texts.len() {
            1 => Ok(texts.remove(0)),
            n => Err(TfError::InvalidString(format!("expected one element, found {}", n))),
        }
    }

    /// Decode every element of a string tensor
    pub fn get_texts(&self) -> Result<Vec<String>> {
        let codec = *self.runtime.functions().string_codec()?;
        let resolved = self.resolve()?;
        let (dtype, bytes) = self.read_buffer(&resolved)?;
        if dtype != DataType::String {
            return Err(tfwrap_common::TensorError::TypeMismatch {
                expected: DataType::String,
                actual: dtype,
            }
            .into());
        }

        let count = tfwrap_common::element_count(&self.read_dims(&resolved));
        let mut texts = Vec::with_capacity(count);
        for body in string::split_bodies(bytes, count)? {
            let mut dst: *const c_char = ptr::null();
            let mut dst_len = 0usize;
            self.runtime.call("TF_StringDecode", |_, status| {
                // SAFETY: body is valid for its length; dst points into it.
                unsafe {
                    (codec.TF_StringDecode)(
                        body.as_ptr() as *const c_char,
                        body.len(),
                        &mut dst,
                        &mut dst_len,
                        status,
                    )
                }
            })?;
            // SAFETY: the runtime set dst/dst_len to a range inside body.
            let decoded = unsafe { std::slice::from_raw_parts(dst as *const u8, dst_len) };
            let text = String::from_utf8(decoded.to_vec())
                .map_err(|e| TfError::InvalidString(e.to_string()))?;
            texts.push(text);
        }
        Ok(texts)
    }

    /// Detach the contents into a host tensor
    pub fn to_host(&self) -> Result<HostTensor> {
        let resolved = self.resolve()?;
        let dims = self.read_dims(&resolved);
        let (dtype, bytes) = self.read_buffer(&resolved)?;
        Ok(HostTensor::from_raw_parts(dtype, dims, bytes.to_vec()))
    }

    fn read_buffer<'a>(&self, resolved: &'a Owned<TF_Tensor>) -> Result<(DataType, &'a [u8])> {
        let f = self.runtime.functions();
        // SAFETY: resolved is live for 'a and owns TF_TensorByteSize bytes
        // at TF_TensorData.
        unsafe {
            let dtype = DataType::from_tf((f.TF_TensorType)(resolved.as_ptr()))?;
            let len = (f.TF_TensorByteSize)(resolved.as_ptr());
            if len == 0 {
                return Ok((dtype, &[]));
            }
            let data = (f.TF_TensorData)(resolved.as_ptr()) as *const u8;
            Ok((dtype, std::slice::from_raw_parts(data, len)))
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Number of `Tensor` values sharing this handle
    pub fn owner_count(&self) -> usize {
        Arc::strong_count(&self.handle)
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("handle", &self.handle)
            .field("buffer", &self.buffer)
            .finish()
    }
}
