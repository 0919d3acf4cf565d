//! Low-level FFI bindings to the TensorFlow C API
//!
//! Covers the subset of `c_api.h` and `eager/c_api.h` this crate uses.
//! Function signatures match the C declarations exactly; the symbols are
//! resolved at run time into [`TfFunctions`].

#![allow(non_camel_case_types, non_snake_case)]

use libloading::Library;
use std::os::raw::{c_char, c_int, c_void};

use crate::error::{Result, TfError};

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

opaque!(
    TF_Status,
    TF_Tensor,
    TF_Graph,
    TF_Operation,
    TF_Session,
    TF_SessionOptions,
    TF_Buffer,
    TF_ImportGraphDefOptions,
    TFE_Context,
    TFE_ContextOptions,
    TFE_TensorHandle,
    TFE_Op,
);

/// `TF_DataType` as passed across the C boundary
pub type TF_DataType = c_int;

/// `TF_Code`; zero is `TF_OK`
pub type TF_Code = c_int;

pub const TF_OK: TF_Code = 0;

/// A specific output of an operation (matches `TF_Output`)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TF_Output {
    pub oper: *mut TF_Operation,
    pub index: c_int,
}

/// Element codec for `TF_STRING` buffers.
///
/// TensorFlow 2.4 replaced these symbols with `TF_TString`; libraries that
/// lack them still load, without string tensor support.
#[derive(Clone, Copy)]
pub struct TfStringCodec {
    pub TF_StringEncodedSize: unsafe extern "C" fn(len: usize) -> usize,
    pub TF_StringEncode: unsafe extern "C" fn(
        src: *const c_char,
        src_len: usize,
        dst: *mut c_char,
        dst_len: usize,
        status: *mut TF_Status,
    ) -> usize,
    pub TF_StringDecode: unsafe extern "C" fn(
        src: *const c_char,
        src_len: usize,
        dst: *mut *const c_char,
        dst_len: *mut usize,
        status: *mut TF_Status,
    ) -> usize,
}

/// FFI function table for the TensorFlow C library
pub struct TfFunctions {
    // Status
    pub TF_NewStatus: unsafe extern "C" fn() -> *mut TF_Status,
    pub TF_DeleteStatus: unsafe extern "C" fn(*mut TF_Status),
    pub TF_GetCode: unsafe extern "C" fn(*const TF_Status) -> TF_Code,
    pub TF_Message: unsafe extern "C" fn(*const TF_Status) -> *const c_char,
    pub TF_Version: unsafe extern "C" fn() -> *const c_char,

    // Tensors
    pub TF_AllocateTensor: unsafe extern "C" fn(
        dtype: TF_DataType,
        dims: *const i64,
        num_dims: c_int,
        len: usize,
    ) -> *mut TF_Tensor,
    pub TF_DeleteTensor: unsafe extern "C" fn(*mut TF_Tensor),
    pub TF_TensorType: unsafe extern "C" fn(*const TF_Tensor) -> TF_DataType,
    pub TF_NumDims: unsafe extern "C" fn(*const TF_Tensor) -> c_int,
    pub TF_Dim: unsafe extern "C" fn(*const TF_Tensor, dim_index: c_int) -> i64,
    pub TF_TensorByteSize: unsafe extern "C" fn(*const TF_Tensor) -> usize,
    pub TF_TensorData: unsafe extern "C" fn(*const TF_Tensor) -> *mut c_void,

    // Variable-length strings, absent from TensorFlow 2.4 on
    pub strings: Option<TfStringCodec>,

    // Eager context
    pub TFE_NewContextOptions: unsafe extern "C" fn() -> *mut TFE_ContextOptions,
    pub TFE_DeleteContextOptions: unsafe extern "C" fn(*mut TFE_ContextOptions),
    pub TFE_NewContext: unsafe extern "C" fn(
        opts: *const TFE_ContextOptions,
        status: *mut TF_Status,
    ) -> *mut TFE_Context,
    pub TFE_DeleteContext: unsafe extern "C" fn(*mut TFE_Context),

    // Eager tensor handles
    pub TFE_NewTensorHandle: unsafe extern "C" fn(
        t: *const TF_Tensor,
        status: *mut TF_Status,
    ) -> *mut TFE_TensorHandle,
    pub TFE_DeleteTensorHandle: unsafe extern "C" fn(*mut TFE_TensorHandle),
    pub TFE_TensorHandleDataType: unsafe extern "C" fn(*mut TFE_TensorHandle) -> TF_DataType,
    pub TFE_TensorHandleDeviceName: unsafe extern "C" fn(
        h: *mut TFE_TensorHandle,
        status: *mut TF_Status,
    ) -> *const c_char,
    pub TFE_TensorHandleBackingDeviceName: unsafe extern "C" fn(
        h: *mut TFE_TensorHandle,
        status: *mut TF_Status,
    ) -> *const c_char,
    pub TFE_TensorHandleResolve: unsafe extern "C" fn(
        h: *mut TFE_TensorHandle,
        status: *mut TF_Status,
    ) -> *mut TF_Tensor,

    // Eager ops
    pub TFE_NewOp: unsafe extern "C" fn(
        ctx: *mut TFE_Context,
        op_or_function_name: *const c_char,
        status: *mut TF_Status,
    ) -> *mut TFE_Op,
    pub TFE_DeleteOp: unsafe extern "C" fn(*mut TFE_Op),
    pub TFE_OpAddInput: unsafe extern "C" fn(
        op: *mut TFE_Op,
        input: *mut TFE_TensorHandle,
        status: *mut TF_Status,
    ),
    pub TFE_OpSetAttrType: unsafe extern "C" fn(
        op: *mut TFE_Op,
        attr_name: *const c_char,
        value: TF_DataType,
    ),
    pub TFE_Execute: unsafe extern "C" fn(
        op: *mut TFE_Op,
        retvals: *mut *mut TFE_TensorHandle,
        num_retvals: *mut c_int,
        status: *mut TF_Status,
    ),

    // Graphs
    pub TF_NewGraph: unsafe extern "C" fn() -> *mut TF_Graph,
    pub TF_DeleteGraph: unsafe extern "C" fn(*mut TF_Graph),
    pub TF_GraphOperationByName: unsafe extern "C" fn(
        graph: *mut TF_Graph,
        oper_name: *const c_char,
    ) -> *mut TF_Operation,
    pub TF_GraphNextOperation: unsafe extern "C" fn(
        graph: *mut TF_Graph,
        pos: *mut usize,
    ) -> *mut TF_Operation,
    pub TF_OperationName: unsafe extern "C" fn(oper: *mut TF_Operation) -> *const c_char,
    pub TF_OperationNumOutputs: unsafe extern "C" fn(oper: *mut TF_Operation) -> c_int,
    pub TF_GraphGetTensorNumDims: unsafe extern "C" fn(
        graph: *mut TF_Graph,
        output: TF_Output,
        status: *mut TF_Status,
    ) -> c_int,
    pub TF_GraphGetTensorShape: unsafe extern "C" fn(
        graph: *mut TF_Graph,
        output: TF_Output,
        dims: *mut i64,
        num_dims: c_int,
        status: *mut TF_Status,
    ),

    // Graph import
    pub TF_NewBufferFromString: unsafe extern "C" fn(
        proto: *const c_void,
        proto_len: usize,
    ) -> *mut TF_Buffer,
    pub TF_DeleteBuffer: unsafe extern "C" fn(*mut TF_Buffer),
    pub TF_NewImportGraphDefOptions: unsafe extern "C" fn() -> *mut TF_ImportGraphDefOptions,
    pub TF_DeleteImportGraphDefOptions: unsafe extern "C" fn(*mut TF_ImportGraphDefOptions),
    pub TF_GraphImportGraphDef: unsafe extern "C" fn(
        graph: *mut TF_Graph,
        graph_def: *const TF_Buffer,
        options: *const TF_ImportGraphDefOptions,
        status: *mut TF_Status,
    ),

    // Sessions
    pub TF_NewSessionOptions: unsafe extern "C" fn() -> *mut TF_SessionOptions,
    pub TF_DeleteSessionOptions: unsafe extern "C" fn(*mut TF_SessionOptions),
    pub TF_NewSession: unsafe extern "C" fn(
        graph: *mut TF_Graph,
        opts: *const TF_SessionOptions,
        status: *mut TF_Status,
    ) -> *mut TF_Session,
    pub TF_LoadSessionFromSavedModel: unsafe extern "C" fn(
        session_options: *const TF_SessionOptions,
        run_options: *const TF_Buffer,
        export_dir: *const c_char,
        tags: *const *const c_char,
        tags_len: c_int,
        graph: *mut TF_Graph,
        meta_graph_def: *mut TF_Buffer,
        status: *mut TF_Status,
    ) -> *mut TF_Session,
    pub TF_CloseSession: unsafe extern "C" fn(*mut TF_Session, status: *mut TF_Status),
    pub TF_DeleteSession: unsafe extern "C" fn(*mut TF_Session, status: *mut TF_Status),
    pub TF_SessionRun: unsafe extern "C" fn(
        session: *mut TF_Session,
        run_options: *const TF_Buffer,
        inputs: *const TF_Output,
        input_values: *const *mut TF_Tensor,
        ninputs: c_int,
        outputs: *const TF_Output,
        output_values: *mut *mut TF_Tensor,
        noutputs: c_int,
        target_opers: *const *const TF_Operation,
        ntargets: c_int,
        run_metadata: *mut TF_Buffer,
        status: *mut TF_Status,
    ),
}

/// Resolve one symbol, copying the function pointer out of the library
///
/// # Safety
/// `T` must be the exact function pointer type of the C symbol `name`.
unsafe fn symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T> {
    library.get::<T>(name).map(|s| *s).map_err(|e| {
        let printable = String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]);
        TfError::Ffi(format!("Missing {}: {}", printable, e))
    })
}

/// Resolve a symbol the library may not export
///
/// # Safety
/// Same as [`symbol`].
unsafe fn optional_symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Option<T> {
    library.get::<T>(name).ok().map(|s| *s)
}

/// # Safety
/// Same as [`symbol`], for each of the three codec symbols.
unsafe fn load_string_codec(library: &Library) -> Option<TfStringCodec> {
    let codec = TfStringCodec {
        TF_StringEncodedSize: optional_symbol(library, b"TF_StringEncodedSize\0")?,
        TF_StringEncode: optional_symbol(library, b"TF_StringEncode\0")?,
        TF_StringDecode: optional_symbol(library, b"TF_StringDecode\0")?,
    };
    Some(codec)
}

impl TfFunctions {
    /// Load all required function symbols from the library
    pub fn load(library: &Library) -> Result<Self> {
        // SAFETY: Every field type below matches the TensorFlow C API
        // declaration of the symbol it is loaded from, and the caller keeps
        // `library` loaded for as long as the table is used.
        unsafe {
            Ok(Self {
                TF_NewStatus: symbol(library, b"TF_NewStatus\0")?,
                TF_DeleteStatus: symbol(library, b"TF_DeleteStatus\0")?,
                TF_GetCode: symbol(library, b"TF_GetCode\0")?,
                TF_Message: symbol(library, b"TF_Message\0")?,
                TF_Version: symbol(library, b"TF_Version\0")?,

                TF_AllocateTensor: symbol(library, b"TF_AllocateTensor\0")?,
                TF_DeleteTensor: symbol(library, b"TF_DeleteTensor\0")?,
                TF_TensorType: symbol(library, b"TF_TensorType\0")?,
                TF_NumDims: symbol(library, b"TF_NumDims\0")?,
                TF_Dim: symbol(library, b"TF_Dim\0")?,
                TF_TensorByteSize: symbol(library, b"TF_TensorByteSize\0")?,
                TF_TensorData: symbol(library, b"TF_TensorData\0")?,

                strings: load_string_codec(library),

                TFE_NewContextOptions: symbol(library, b"TFE_NewContextOptions\0")?,
                TFE_DeleteContextOptions: symbol(library, b"TFE_DeleteContextOptions\0")?,
                TFE_NewContext: symbol(library, b"TFE_NewContext\0")?,
                TFE_DeleteContext: symbol(library, b"TFE_DeleteContext\0")?,

                TFE_NewTensorHandle: symbol(library, b"TFE_NewTensorHandle\0")?,
                TFE_DeleteTensorHandle: symbol(library, b"TFE_DeleteTensorHandle\0")?,
                TFE_TensorHandleDataType: symbol(library, b"TFE_TensorHandleDataType\0")?,
                TFE_TensorHandleDeviceName: symbol(library, b"TFE_TensorHandleDeviceName\0")?,
                TFE_TensorHandleBackingDeviceName: symbol(
                    library,
                    b"TFE_TensorHandleBackingDeviceName\0",
                )?,
                TFE_TensorHandleResolve: symbol(library, b"TFE_TensorHandleResolve\0")?,

                TFE_NewOp: symbol(library, b"TFE_NewOp\0")?,
                TFE_DeleteOp: symbol(library, b"TFE_DeleteOp\0")?,
                TFE_OpAddInput: symbol(library, b"TFE_OpAddInput\0")?,
                TFE_OpSetAttrType: symbol(library, b"TFE_OpSetAttrType\0")?,
                TFE_Execute: symbol(library, b"TFE_Execute\0")?,

                TF_NewGraph: symbol(library, b"TF_NewGraph\0")?,
                TF_DeleteGraph: symbol(library, b"TF_DeleteGraph\0")?,
                TF_GraphOperationByName: symbol(library, b"TF_GraphOperationByName\0")?,
                TF_GraphNextOperation: symbol(library, b"TF_GraphNextOperation\0")?,
                TF_OperationName: symbol(library, b"TF_OperationName\0")?,
                TF_OperationNumOutputs: symbol(library, b"TF_OperationNumOutputs\0")?,
                TF_GraphGetTensorNumDims: symbol(library, b"TF_GraphGetTensorNumDims\0")?,
                TF_GraphGetTensorShape: symbol(library, b"TF_GraphGetTensorShape\0")?,

                TF_NewBufferFromString: symbol(library, b"TF_NewBufferFromString\0")?,
                TF_DeleteBuffer: symbol(library, b"TF_DeleteBuffer\0")?,
                TF_NewImportGraphDefOptions: symbol(library, b"TF_NewImportGraphDefOptions\0")?,
                TF_DeleteImportGraphDefOptions: symbol(
                    library,
                    b"TF_DeleteImportGraphDefOptions\0",
                )?,
                TF_GraphImportGraphDef: symbol(library, b"TF_GraphImportGraphDef\0")?,

                TF_NewSessionOptions: symbol(library, b"TF_NewSessionOptions\0")?,
                TF_DeleteSessionOptions: symbol(library, b"TF_DeleteSessionOptions\0")?,
                TF_NewSession: symbol(library, b"TF_NewSession\0")?,
                TF_LoadSessionFromSavedModel: symbol(library, b"TF_LoadSessionFromSavedModel\0")?,
                TF_CloseSession: symbol(library, b"TF_CloseSession\0")?,
                TF_DeleteSession: symbol(library, b"TF_DeleteSession\0")?,
                TF_SessionRun: symbol(library, b"TF_SessionRun\0")?,
            })
        }
    }

    /// The string codec, or an error naming the missing symbols
    pub fn string_codec(&self) -> Result<&TfStringCodec> {
        self.strings.as_ref().ok_or_else(|| {
            TfError::Ffi(
                "TF_StringEncode/TF_StringDecode not exported by this TensorFlow build; \
                 string tensors are unavailable"
                    .to_string(),
            )
        })
    }
}
