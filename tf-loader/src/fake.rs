//! In-process stand-in for the TensorFlow C API, used by unit tests.
//!
//! Tensors are plain heap objects, `Shape` is the only eager op, and the
//! single saved model it knows maps a `[batch, 5]` float input to a
//! `[batch, 3]` output whose rows hold the input row sums. Live tensors,
//! handles and graphs are counted per thread so tests can check release.

use crate::ffi::*;
use crate::runtime::Runtime;
use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) const INPUT_WIDTH: i64 = 5;
pub(crate) const OUTPUT_WIDTH: i64 = 3;

/// A dimension value that makes `TF_AllocateTensor` return null
pub(crate) const ALLOC_FAIL_DIM: i64 = -42;

const TF_FLOAT: c_int = 1;
const TF_INT64: c_int = 9;
const INVALID_ARGUMENT: c_int = 3;
const NOT_FOUND: c_int = 5;

thread_local! {
    static LIVE_OBJECTS: Cell<isize> = const { Cell::new(0) };
    static LIVE_GRAPHS: Cell<isize> = const { Cell::new(0) };
}

/// Tensors plus tensor handles currently alive on this thread
pub(crate) fn live_objects() -> isize {
    LIVE_OBJECTS.with(Cell::get)
}

pub(crate) fn live_graphs() -> isize {
    LIVE_GRAPHS.with(Cell::get)
}

fn track(delta: isize) {
    LIVE_OBJECTS.with(|c| c.set(c.get() + delta));
}

fn track_graph(delta: isize) {
    LIVE_GRAPHS.with(|g| g.set(g.get() + delta));
}

pub(crate) fn saved_model_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub(crate) fn runtime() -> Arc<Runtime> {
    Runtime::with_functions(functions(), None).expect("fake runtime")
}

/// Mark `status` failed and return unit, for driving `Runtime::call`
pub(crate) fn fail(status: *mut TF_Status, code: c_int, message: &str) {
    // SAFETY: status comes from the fake TF_NewStatus.
    unsafe { set_status(status, code, message) }
}

/// Mark `status` OK and pass `value` through
pub(crate) fn succeed<T>(status: *mut TF_Status, value: T) -> T {
    // SAFETY: status comes from the fake TF_NewStatus.
    unsafe { set_status(status, 0, "") };
    value
}

struct Status {
    code: c_int,
    message: CString,
}

#[derive(Clone)]
struct FakeTensor {
    dtype: c_int,
    dims: Vec<i64>,
    data: Vec<u8>,
}

struct Handle {
    tensor: FakeTensor,
}

struct Op {
    inputs: Vec<FakeTensor>,
    out_type: c_int,
}

struct Operation {
    name: CString,
    num_outputs: c_int,
    dims: Vec<i64>,
}

struct Graph {
    ops: Vec<Box<Operation>>,
}

struct Session;

struct Buffer {
    data: Vec<u8>,
}

struct Unit;

unsafe fn set_status(status: *mut TF_Status, code: c_int, message: &str) {
    let status = &mut *(status as *mut Status);
    status.code = code;
    status.message = CString::new(message).unwrap_or_default();
}

unsafe fn tensor<'a>(t: *const TF_Tensor) -> &'a mut FakeTensor {
    &mut *(t as *mut FakeTensor)
}

unsafe fn handle<'a>(h: *mut TFE_TensorHandle) -> &'a Handle {
    &*(h as *const Handle)
}

fn boxed_tensor(t: FakeTensor) -> *mut TF_Tensor {
    track(1);
    Box::into_raw(Box::new(t)) as *mut TF_Tensor
}

fn varint_len(mut value: usize) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

// Status

unsafe extern "C" fn new_status() -> *mut TF_Status {
    Box::into_raw(Box::new(Status {
        code: 0,
        message: CString::default(),
    })) as *mut TF_Status
}

unsafe extern "C" fn delete_status(s: *mut TF_Status) {
    drop(Box::from_raw(s as *mut Status));
}

unsafe extern "C" fn get_code(s: *const TF_Status) -> TF_Code {
    (*(s as *const Status)).code
}

unsafe extern "C" fn message(s: *const TF_Status) -> *const c_char {
    (*(s as *const Status)).message.as_ptr()
}

unsafe extern "C" fn version() -> *const c_char {
    b"fake-2.3.0\0".as_ptr() as *const c_char
}

// Tensors

unsafe extern "C" fn allocate_tensor(
    dtype: TF_DataType,
    dims: *const i64,
    num_dims: c_int,
    len: usize,
) -> *mut TF_Tensor {
    let dims = if num_dims == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(dims, num_dims as usize).to_vec()
    };
    if dims.contains(&ALLOC_FAIL_DIM) {
        return std::ptr::null_mut();
    }
    boxed_tensor(FakeTensor {
        dtype,
        dims,
        data: vec![0; len],
    })
}

unsafe extern "C" fn delete_tensor(t: *mut TF_Tensor) {
    track(-1);
    drop(Box::from_raw(t as *mut FakeTensor));
}

unsafe extern "C" fn tensor_type(t: *const TF_Tensor) -> TF_DataType {
    tensor(t).dtype
}

unsafe extern "C" fn num_dims(t: *const TF_Tensor) -> c_int {
    tensor(t).dims.len() as c_int
}

unsafe extern "C" fn dim(t: *const TF_Tensor, index: c_int) -> i64 {
    tensor(t).dims[index as usize]
}

unsafe extern "C" fn byte_size(t: *const TF_Tensor) -> usize {
    tensor(t).data.len()
}

unsafe extern "C" fn tensor_data(t: *const TF_Tensor) -> *mut c_void {
    tensor(t).data.as_mut_ptr() as *mut c_void
}

// Strings: varint length followed by the raw bytes

unsafe extern "C" fn string_encoded_size(len: usize) -> usize {
    varint_len(len) + len
}

unsafe extern "C" fn string_encode(
    src: *const c_char,
    src_len: usize,
    dst: *mut c_char,
    dst_len: usize,
    status: *mut TF_Status,
) -> usize {
    let need = varint_len(src_len) + src_len;
    if dst_len < need {
        set_status(status, INVALID_ARGUMENT, "dst_len too small");
        return 0;
    }
    let dst = std::slice::from_raw_parts_mut(dst as *mut u8, dst_len);
    let mut value = src_len;
    let mut i = 0;
    while value >= 0x80 {
        dst[i] = (value as u8 & 0x7f) | 0x80;
        value >>= 7;
        i += 1;
    }
    dst[i] = value as u8;
    i += 1;
    if src_len > 0 {
        std::ptr::copy_nonoverlapping(src as *const u8, dst[i..].as_mut_ptr(), src_len);
    }
    set_status(status, 0, "");
    need
}

unsafe extern "C" fn string_decode(
    src: *const c_char,
    src_len: usize,
    dst: *mut *const c_char,
    dst_len: *mut usize,
    status: *mut TF_Status,
) -> usize {
    let bytes = std::slice::from_raw_parts(src as *const u8, src_len);
    let mut len = 0usize;
    let mut shift = 0;
    let mut consumed = 0;
    loop {
        let Some(byte) = bytes.get(consumed) else {
            set_status(status, INVALID_ARGUMENT, "truncated varint");
            return 0;
        };
        len |= ((byte & 0x7f) as usize) << shift;
        consumed += 1;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if consumed + len > src_len {
        set_status(status, INVALID_ARGUMENT, "string body overruns buffer");
        return 0;
    }
    *dst = src.add(consumed);
    *dst_len = len;
    set_status(status, 0, "");
    consumed + len
}

// Eager context, handles and ops

unsafe extern "C" fn new_context_options() -> *mut TFE_ContextOptions {
    Box::into_raw(Box::new(Unit)) as *mut TFE_ContextOptions
}

unsafe extern "C" fn delete_context_options(o: *mut TFE_ContextOptions) {
    drop(Box::from_raw(o as *mut Unit));
}

unsafe extern "C" fn new_context(
    _opts: *const TFE_ContextOptions,
    status: *mut TF_Status,
) -> *mut TFE_Context {
    set_status(status, 0, "");
    Box::into_raw(Box::new(Unit)) as *mut TFE_Context
}

unsafe extern "C" fn delete_context(c: *mut TFE_Context) {
    drop(Box::from_raw(c as *mut Unit));
}

unsafe extern "C" fn new_tensor_handle(
    t: *const TF_Tensor,
    status: *mut TF_Status,
) -> *mut TFE_TensorHandle {
    set_status(status, 0, "");
    track(1);
    Box::into_raw(Box::new(Handle {
        tensor: tensor(t).clone(),
    })) as *mut TFE_TensorHandle
}

unsafe extern "C" fn delete_tensor_handle(h: *mut TFE_TensorHandle) {
    track(-1);
    drop(Box::from_raw(h as *mut Handle));
}

unsafe extern "C" fn handle_data_type(h: *mut TFE_TensorHandle) -> TF_DataType {
    handle(h).tensor.dtype
}

unsafe extern "C" fn device_name(
    _h: *mut TFE_TensorHandle,
    status: *mut TF_Status,
) -> *const c_char {
    set_status(status, 0, "");
    b"/job:localhost/replica:0/task:0/device:CPU:0\0".as_ptr() as *const c_char
}

unsafe extern "C" fn resolve(h: *mut TFE_TensorHandle, status: *mut TF_Status) -> *mut TF_Tensor {
    set_status(status, 0, "");
    boxed_tensor(handle(h).tensor.clone())
}

unsafe extern "C" fn new_op(
    _ctx: *mut TFE_Context,
    name: *const c_char,
    status: *mut TF_Status,
) -> *mut TFE_Op {
    if CStr::from_ptr(name).to_bytes() != b"Shape" {
        set_status(status, NOT_FOUND, "op not registered");
        return std::ptr::null_mut();
    }
    set_status(status, 0, "");
    Box::into_raw(Box::new(Op {
        inputs: Vec::new(),
        out_type: 3,
    })) as *mut TFE_Op
}

unsafe extern "C" fn delete_op(op: *mut TFE_Op) {
    drop(Box::from_raw(op as *mut Op));
}

unsafe extern "C" fn op_add_input(
    op: *mut TFE_Op,
    h: *mut TFE_TensorHandle,
    status: *mut TF_Status,
) {
    (*(op as *mut Op)).inputs.push(handle(h).tensor.clone());
    set_status(status, 0, "");
}

unsafe extern "C" fn op_set_attr_type(op: *mut TFE_Op, name: *const c_char, value: TF_DataType) {
    if CStr::from_ptr(name).to_bytes() == b"out_type" {
        (*(op as *mut Op)).out_type = value;
    }
}

unsafe extern "C" fn execute(
    op: *mut TFE_Op,
    retvals: *mut *mut TFE_TensorHandle,
    num_retvals: *mut c_int,
    status: *mut TF_Status,
) {
    let op = &*(op as *const Op);
    let Some(input) = op.inputs.first() else {
        set_status(status, INVALID_ARGUMENT, "Shape expects one input");
        return;
    };
    if op.out_type != TF_INT64 {
        set_status(status, INVALID_ARGUMENT, "fake Shape only emits int64");
        return;
    }
    let data = input.dims.iter().flat_map(|d| d.to_ne_bytes()).collect();
    let shape = FakeTensor {
        dtype: TF_INT64,
        dims: vec![input.dims.len() as i64],
        data,
    };
    track(1);
    *retvals = Box::into_raw(Box::new(Handle { tensor: shape })) as *mut TFE_TensorHandle;
    *num_retvals = 1;
    set_status(status, 0, "");
}

// Graphs

unsafe extern "C" fn new_graph() -> *mut TF_Graph {
    track_graph(1);
    Box::into_raw(Box::new(Graph { ops: Vec::new() })) as *mut TF_Graph
}

unsafe extern "C" fn delete_graph(g: *mut TF_Graph) {
    track_graph(-1);
    drop(Box::from_raw(g as *mut Graph));
}

unsafe fn graph<'a>(g: *mut TF_Graph) -> &'a mut Graph {
    &mut *(g as *mut Graph)
}

fn add_op(graph: &mut Graph, name: &str, num_outputs: c_int, dims: Vec<i64>) {
    graph.ops.push(Box::new(Operation {
        name: CString::new(name).unwrap_or_default(),
        num_outputs,
        dims,
    }));
}

unsafe extern "C" fn graph_operation_by_name(
    g: *mut TF_Graph,
    name: *const c_char,
) -> *mut TF_Operation {
    let name = CStr::from_ptr(name);
    graph(g)
        .ops
        .iter()
        .find(|op| op.name.as_c_str() == name)
        .map(|op| &**op as *const Operation as *mut TF_Operation)
        .unwrap_or(std::ptr::null_mut())
}

unsafe extern "C" fn graph_next_operation(g: *mut TF_Graph, pos: *mut usize) -> *mut TF_Operation {
    match graph(g).ops.get(*pos) {
        Some(op) => {
            *pos += 1;
            &**op as *const Operation as *mut TF_Operation
        }
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn operation_name(op: *mut TF_Operation) -> *const c_char {
    (*(op as *const Operation)).name.as_ptr()
}

unsafe extern "C" fn operation_num_outputs(op: *mut TF_Operation) -> c_int {
    (*(op as *const Operation)).num_outputs
}

unsafe extern "C" fn graph_get_tensor_num_dims(
    _g: *mut TF_Graph,
    output: TF_Output,
    status: *mut TF_Status,
) -> c_int {
    set_status(status, 0, "");
    (*(output.oper as *const Operation)).dims.len() as c_int
}

unsafe extern "C" fn graph_get_tensor_shape(
    _g: *mut TF_Graph,
    output: TF_Output,
    dims: *mut i64,
    num_dims: c_int,
    status: *mut TF_Status,
) {
    let known = &(*(output.oper as *const Operation)).dims;
    if known.len() != num_dims as usize {
        set_status(status, INVALID_ARGUMENT, "rank mismatch");
        return;
    }
    std::ptr::copy_nonoverlapping(known.as_ptr(), dims, known.len());
    set_status(status, 0, "");
}

unsafe extern "C" fn new_buffer_from_string(proto: *const c_void, len: usize) -> *mut TF_Buffer {
    let data = std::slice::from_raw_parts(proto as *const u8, len).to_vec();
    Box::into_raw(Box::new(Buffer { data })) as *mut TF_Buffer
}

unsafe extern "C" fn delete_buffer(b: *mut TF_Buffer) {
    drop(Box::from_raw(b as *mut Buffer));
}

unsafe extern "C" fn new_import_options() -> *mut TF_ImportGraphDefOptions {
    Box::into_raw(Box::new(Unit)) as *mut TF_ImportGraphDefOptions
}

unsafe extern "C" fn delete_import_options(o: *mut TF_ImportGraphDefOptions) {
    drop(Box::from_raw(o as *mut Unit));
}

/// Frozen graphs are newline-separated op names
unsafe extern "C" fn import_graph_def(
    g: *mut TF_Graph,
    def: *const TF_Buffer,
    _opts: *const TF_ImportGraphDefOptions,
    status: *mut TF_Status,
) {
    let data = &(*(def as *const Buffer)).data;
    let Ok(text) = std::str::from_utf8(data) else {
        set_status(status, INVALID_ARGUMENT, "Invalid GraphDef");
        return;
    };
    let graph = graph(g);
    for name in text.lines().filter(|l| !l.is_empty()) {
        add_op(graph, name, 1, Vec::new());
    }
    set_status(status, 0, "");
}

// Sessions

unsafe extern "C" fn new_session_options() -> *mut TF_SessionOptions {
    Box::into_raw(Box::new(Unit)) as *mut TF_SessionOptions
}

unsafe extern "C" fn delete_session_options(o: *mut TF_SessionOptions) {
    drop(Box::from_raw(o as *mut Unit));
}

unsafe extern "C" fn new_session(
    _g: *mut TF_Graph,
    _opts: *const TF_SessionOptions,
    status: *mut TF_Status,
) -> *mut TF_Session {
    set_status(status, 0, "");
    Box::into_raw(Box::new(Session)) as *mut TF_Session
}

unsafe extern "C" fn load_session_from_saved_model(
    _opts: *const TF_SessionOptions,
    _run_options: *const TF_Buffer,
    export_dir: *const c_char,
    tags: *const *const c_char,
    tags_len: c_int,
    g: *mut TF_Graph,
    _meta_graph_def: *mut TF_Buffer,
    status: *mut TF_Status,
) -> *mut TF_Session {
    let dir = CStr::from_ptr(export_dir).to_string_lossy().into_owned();
    if !Path::new(&dir).is_dir() {
        set_status(
            status,
            NOT_FOUND,
            &format!(
                "Could not find SavedModel .pb or .pbtxt at supplied export directory path: {}",
                dir
            ),
        );
        return std::ptr::null_mut();
    }
    let tags = std::slice::from_raw_parts(tags, tags_len as usize);
    if !tags.iter().any(|t| CStr::from_ptr(*t).to_bytes() == b"serve") {
        set_status(status, NOT_FOUND, "Could not find meta graph def matching supplied tags");
        return std::ptr::null_mut();
    }

    let graph = graph(g);
    add_op(graph, "serving_default_input_1", 1, vec![-1, INPUT_WIDTH]);
    add_op(graph, "StatefulPartitionedCall", 2, vec![-1, OUTPUT_WIDTH]);
    add_op(graph, "NoOp", 0, Vec::new());
    set_status(status, 0, "");
    Box::into_raw(Box::new(Session)) as *mut TF_Session
}

unsafe extern "C" fn close_session(_s: *mut TF_Session, status: *mut TF_Status) {
    set_status(status, 0, "");
}

unsafe extern "C" fn delete_session(s: *mut TF_Session, status: *mut TF_Status) {
    drop(Box::from_raw(s as *mut Session));
    set_status(status, 0, "");
}

unsafe extern "C" fn session_run(
    _session: *mut TF_Session,
    _run_options: *const TF_Buffer,
    _inputs: *const TF_Output,
    input_values: *const *mut TF_Tensor,
    ninputs: c_int,
    _outputs: *const TF_Output,
    output_values: *mut *mut TF_Tensor,
    noutputs: c_int,
    _targets: *const *const TF_Operation,
    _ntargets: c_int,
    _run_metadata: *mut TF_Buffer,
    status: *mut TF_Status,
) {
    if ninputs < 1 {
        set_status(status, INVALID_ARGUMENT, "no feeds");
        return;
    }
    let input = tensor(*input_values);
    if input.dtype != TF_FLOAT || input.dims.len() != 2 || input.dims[1] != INPUT_WIDTH {
        set_status(status, INVALID_ARGUMENT, "expected a [batch, 5] float input");
        return;
    }

    let batch = input.dims[0] as usize;
    let rows: Vec<f32> = input
        .data
        .chunks_exact(4 * INPUT_WIDTH as usize)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .sum()
        })
        .collect();

    for i in 0..noutputs as usize {
        let mut data = Vec::with_capacity(batch * OUTPUT_WIDTH as usize * 4);
        for sum in &rows {
            for _ in 0..OUTPUT_WIDTH {
                data.extend_from_slice(&sum.to_ne_bytes());
            }
        }
        *output_values.add(i) = boxed_tensor(FakeTensor {
            dtype: TF_FLOAT,
            dims: vec![batch as i64, OUTPUT_WIDTH],
            data,
        });
    }
    set_status(status, 0, "");
}

pub(crate) fn functions() -> TfFunctions {
    TfFunctions {
        TF_NewStatus: new_status,
        TF_DeleteStatus: delete_status,
        TF_GetCode: get_code,
        TF_Message: message,
        TF_Version: version,

        TF_AllocateTensor: allocate_tensor,
        TF_DeleteTensor: delete_tensor,
        TF_TensorType: tensor_type,
        TF_NumDims: num_dims,
        TF_Dim: dim,
        TF_TensorByteSize: byte_size,
        TF_TensorData: tensor_data,

        strings: Some(TfStringCodec {
            TF_StringEncodedSize: string_encoded_size,
            TF_StringEncode: string_encode,
            TF_StringDecode: string_decode,
        }),

        TFE_NewContextOptions: new_context_options,
        TFE_DeleteContextOptions: delete_context_options,
        TFE_NewContext: new_context,
        TFE_DeleteContext: delete_context,

        TFE_NewTensorHandle: new_tensor_handle,
        TFE_DeleteTensorHandle: delete_tensor_handle,
        TFE_TensorHandleDataType: handle_data_type,
        TFE_TensorHandleDeviceName: device_name,
        TFE_TensorHandleBackingDeviceName: device_name,
        TFE_TensorHandleResolve: resolve,

        TFE_NewOp: new_op,
        TFE_DeleteOp: delete_op,
        TFE_OpAddInput: op_add_input,
        TFE_OpSetAttrType: op_set_attr_type,
        TFE_Execute: execute,

        TF_NewGraph: new_graph,
        TF_DeleteGraph: delete_graph,
        TF_GraphOperationByName: graph_operation_by_name,
        TF_GraphNextOperation: graph_next_operation,
        TF_OperationName: operation_name,
        TF_OperationNumOutputs: operation_num_outputs,
        TF_GraphGetTensorNumDims: graph_get_tensor_num_dims,
        TF_GraphGetTensorShape: graph_get_tensor_shape,

        TF_NewBufferFromString: new_buffer_from_string,
        TF_DeleteBuffer: delete_buffer,
        TF_NewImportGraphDefOptions: new_import_options,
        TF_DeleteImportGraphDefOptions: delete_import_options,
        TF_GraphImportGraphDef: import_graph_def,

        TF_NewSessionOptions: new_session_options,
        TF_DeleteSessionOptions: delete_session_options,
        TF_NewSession: new_session,
        TF_LoadSessionFromSavedModel: load_session_from_saved_model,
        TF_CloseSession: close_session,
        TF_DeleteSession: delete_session,
        TF_SessionRun: session_run,
    }
}
