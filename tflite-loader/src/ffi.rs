//! Low-level FFI bindings to the TensorFlow Lite C API (`c_api.h`)

#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]

use libloading::Library;
use std::os::raw::{c_char, c_int, c_void};

use crate::error::{LiteError, Result};

macro_rules! opaque {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque!(TfLiteModel, TfLiteInterpreterOptions, TfLiteInterpreter, TfLiteTensor);

/// `TfLiteStatus`; zero is `kTfLiteOk`
pub type TfLiteStatus = c_int;

pub const kTfLiteOk: TfLiteStatus = 0;

/// `TfLiteType` element tag
pub type TfLiteType = c_int;

/// Error reporter callback.
///
/// The last parameter is the C `va_list`. It is only ever forwarded to
/// `vsnprintf`, and every supported ABI passes a `va_list` argument as a
/// single pointer-sized value.
pub type ErrorReporter =
    unsafe extern "C" fn(user_data: *mut c_void, format: *const c_char, args: *mut c_void);

/// FFI function table for the TFLite C library
pub struct LiteFunctions {
    pub TfLiteVersion: unsafe extern "C" fn() -> *const c_char,

    // Model
    pub TfLiteModelCreate:
        unsafe extern "C" fn(model_data: *const c_void, model_size: usize) -> *mut TfLiteModel,
    pub TfLiteModelCreateFromFile:
        unsafe extern "C" fn(model_path: *const c_char) -> *mut TfLiteModel,
    pub TfLiteModelDelete: unsafe extern "C" fn(*mut TfLiteModel),

    // Interpreter options
    pub TfLiteInterpreterOptionsCreate: unsafe extern "C" fn() -> *mut TfLiteInterpreterOptions,
    pub TfLiteInterpreterOptionsDelete: unsafe extern "C" fn(*mut TfLiteInterpreterOptions),
    pub TfLiteInterpreterOptionsSetNumThreads:
        unsafe extern "C" fn(options: *mut TfLiteInterpreterOptions, num_threads: i32),
    pub TfLiteInterpreterOptionsSetErrorReporter: unsafe extern "C" fn(
        options: *mut TfLiteInterpreterOptions,
        reporter: Option<ErrorReporter>,
        user_data: *mut c_void,
    ),

    // Interpreter
    pub TfLiteInterpreterCreate: unsafe extern "C" fn(
        model: *const TfLiteModel,
        options: *const TfLiteInterpreterOptions,
    ) -> *mut TfLiteInterpreter,
    pub TfLiteInterpreterDelete: unsafe extern "C" fn(*mut TfLiteInterpreter),
    pub TfLiteInterpreterGetInputTensorCount: unsafe extern "C" fn(*const TfLiteInterpreter) -> i32,
    pub TfLiteInterpreterGetInputTensor:
        unsafe extern "C" fn(*const TfLiteInterpreter, input_index: i32) -> *mut TfLiteTensor,
    pub TfLiteInterpreterResizeInputTensor: unsafe extern "C" fn(
        interpreter: *mut TfLiteInterpreter,
        input_index: i32,
        input_dims: *const c_int,
        input_dims_size: i32,
    ) -> TfLiteStatus,
    pub TfLiteInterpreterAllocateTensors:
        unsafe extern "C" fn(*mut TfLiteInterpreter) -> TfLiteStatus,
    pub TfLiteInterpreterInvoke: unsafe extern "C" fn(*mut TfLiteInterpreter) -> TfLiteStatus,
    pub TfLiteInterpreterGetOutputTensorCount:
        unsafe extern "C" fn(*const TfLiteInterpreter) -> i32,
    pub TfLiteInterpreterGetOutputTensor:
        unsafe extern "C" fn(*const TfLiteInterpreter, output_index: i32) -> *const TfLiteTensor,

    // Tensors
    pub TfLiteTensorType: unsafe extern "C" fn(*const TfLiteTensor) -> TfLiteType,
    pub TfLiteTensorNumDims: unsafe extern "C" fn(*const TfLiteTensor) -> i32,
    pub TfLiteTensorDim: unsafe extern "C" fn(*const TfLiteTensor, dim_index: i32) -> i32,
    pub TfLiteTensorByteSize: unsafe extern "C" fn(*const TfLiteTensor) -> usize,
    pub TfLiteTensorName: unsafe extern "C" fn(*const TfLiteTensor) -> *const c_char,
    pub TfLiteTensorCopyFromBuffer: unsafe extern "C" fn(
        tensor: *mut TfLiteTensor,
        input_data: *const c_void,
        input_data_size: usize,
    ) -> TfLiteStatus,
    pub TfLiteTensorCopyToBuffer: unsafe extern "C" fn(
        output_tensor: *const TfLiteTensor,
        output_data: *mut c_void,
        output_data_size: usize,
    ) -> TfLiteStatus,
}

/// Resolve one symbol, copying the function pointer out of the library
///
/// # Safety
/// `T` must be the exact function pointer type of the C symbol `name`.
unsafe fn symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T> {
    library.get::<T>(name).map(|s| *s).map_err(|e| {
        let printable = String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]);
        LiteError::Ffi(format!("Missing {}: {}", printable, e))
    })
}

impl LiteFunctions {
    /// Load all required function symbols from the library
    pub fn load(library: &Library) -> Result<Self> {
        // SAFETY: Every field type matches the `c_api.h` declaration of the
        // symbol it is loaded from; the caller keeps `library` loaded while
        // the table is in use.
        unsafe {
            Ok(Self {
                TfLiteVersion: symbol(library, b"TfLiteVersion\0")?,

                TfLiteModelCreate: symbol(library, b"TfLiteModelCreate\0")?,
                TfLiteModelCreateFromFile: symbol(library, b"TfLiteModelCreateFromFile\0")?,
                TfLiteModelDelete: symbol(library, b"TfLiteModelDelete\0")?,

                TfLiteInterpreterOptionsCreate: symbol(
                    library,
                    b"TfLiteInterpreterOptionsCreate\0",
                )?,
                TfLiteInterpreterOptionsDelete: symbol(
                    library,
                    b"TfLiteInterpreterOptionsDelete\0",
                )?,
                TfLiteInterpreterOptionsSetNumThreads: symbol(
                    library,
                    b"TfLiteInterpreterOptionsSetNumThreads\0",
                )?,
                TfLiteInterpreterOptionsSetErrorReporter: symbol(
                    library,
                    b"TfLiteInterpreterOptionsSetErrorReporter\0",
                )?,

                TfLiteInterpreterCreate: symbol(library, b"TfLiteInterpreterCreate\0")?,
                TfLiteInterpreterDelete: symbol(library, b"TfLiteInterpreterDelete\0")?,
                TfLiteInterpreterGetInputTensorCount: symbol(
                    library,
                    b"TfLiteInterpreterGetInputTensorCount\0",
                )?,
                TfLiteInterpreterGetInputTensor: symbol(
                    library,
                    b"TfLiteInterpreterGetInputTensor\0",
                )?,
                TfLiteInterpreterResizeInputTensor: symbol(
                    library,
                    b"TfLiteInterpreterResizeInputTensor\0",
                )?,
                TfLiteInterpreterAllocateTensors: symbol(
                    library,
                    b"TfLiteInterpreterAllocateTensors\0",
                )?,
                TfLiteInterpreterInvoke: symbol(library, b"TfLiteInterpreterInvoke\0")?,
                TfLiteInterpreterGetOutputTensorCount: symbol(
                    library,
                    b"TfLiteInterpreterGetOutputTensorCount\0",
                )?,
                TfLiteInterpreterGetOutputTensor: symbol(
                    library,
                    b"TfLiteInterpreterGetOutputTensor\0",
                )?,

                TfLiteTensorType: symbol(library, b"TfLiteTensorType\0")?,
                TfLiteTensorNumDims: symbol(library, b"TfLiteTensorNumDims\0")?,
                TfLiteTensorDim: symbol(library, b"TfLiteTensorDim\0")?,
                TfLiteTensorByteSize: symbol(library, b"TfLiteTensorByteSize\0")?,
                TfLiteTensorName: symbol(library, b"TfLiteTensorName\0")?,
                TfLiteTensorCopyFromBuffer: symbol(library, b"TfLiteTensorCopyFromBuffer\0")?,
                TfLiteTensorCopyToBuffer: symbol(library, b"TfLiteTensorCopyToBuffer\0")?,
            })
        }
    }
}
