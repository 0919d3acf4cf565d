//! In-process stand-in for the TFLite C API, used by unit tests.
//!
//! A model blob is the text `lite outputs=N`, optionally followed by
//! `fail_allocate`. Its interpreter has one float input named `input`
//! shaped `[batch, INPUT_WIDTH]` (batch 1 until resized) and `N` outputs
//! shaped `[batch, 1]`, where output `k` holds each input row sum plus `k`.
//! Allocation rebuilds every output tensor, so stale slot pointers dangle.

use crate::ffi::*;
use crate::runtime::LiteRuntime;
use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::sync::Arc;

pub(crate) const INPUT_WIDTH: i64 = 4;

const FLOAT32: TfLiteType = 1;
const ERROR: TfLiteStatus = 1;

thread_local! {
    static LIVE_OBJECTS: Cell<isize> = const { Cell::new(0) };
    static LAST_NUM_THREADS: Cell<i32> = const { Cell::new(0) };
    static REPORTER_INSTALLED: Cell<bool> = const { Cell::new(false) };
    static FAILING_ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

/// Models, options and interpreters alive on this thread
pub(crate) fn live_objects() -> isize {
    LIVE_OBJECTS.with(Cell::get)
}

/// Thread count of the most recently created interpreter
pub(crate) fn last_num_threads() -> i32 {
    LAST_NUM_THREADS.with(Cell::get)
}

pub(crate) fn reporter_installed() -> bool {
    REPORTER_INSTALLED.with(Cell::get)
}

/// Make the next `count` calls to `TfLiteInterpreterAllocateTensors` on
/// this thread fail
pub(crate) fn fail_allocations(count: usize) {
    FAILING_ALLOCATIONS.with(|c| c.set(count));
}

pub(crate) fn model_bytes(outputs: usize) -> Vec<u8> {
    format!("lite outputs={}", outputs).into_bytes()
}

pub(crate) fn runtime() -> Arc<LiteRuntime> {
    LiteRuntime::with_functions(functions(), None)
}

fn track(delta: isize) {
    LIVE_OBJECTS.with(|c| c.set(c.get() + delta));
}

fn boxed<T, U>(value: T) -> *mut U {
    track(1);
    Box::into_raw(Box::new(value)) as *mut U
}

unsafe fn release<T, U>(ptr: *mut U) {
    track(-1);
    drop(Box::from_raw(ptr as *mut T));
}

struct Model {
    outputs: usize,
    fail_allocate: bool,
}

struct Options {
    num_threads: i32,
    reporter: Option<ErrorReporter>,
}

struct Tensor {
    dims: Vec<i32>,
    data: Vec<u8>,
    name: CString,
}

struct Interpreter {
    input: Box<Tensor>,
    outputs: Vec<Box<Tensor>>,
    num_outputs: usize,
    fail_allocate: bool,
    allocated: bool,
}

fn parse_model(bytes: &[u8]) -> Option<Model> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut words = text.split_whitespace();
    if words.next()? != "lite" {
        return None;
    }
    let mut model = Model {
        outputs: 1,
        fail_allocate: false,
    };
    for word in words {
        match word.split_once('=') {
            Some(("outputs", n)) => model.outputs = n.parse().ok()?,
            None if word == "fail_allocate" => model.fail_allocate = true,
            _ => return None,
        }
    }
    Some(model)
}

fn new_tensor(dims: Vec<i32>, name: String) -> Box<Tensor> {
    let elements: i32 = dims.iter().product();
    Box::new(Tensor {
        data: vec![0; elements.max(0) as usize * 4],
        dims,
        name: CString::new(name).unwrap_or_default(),
    })
}

unsafe fn tensor<'a>(t: *const TfLiteTensor) -> &'a mut Tensor {
    &mut *(t as *mut Tensor)
}

unsafe fn interpreter<'a>(i: *const TfLiteInterpreter) -> &'a mut Interpreter {
    &mut *(i as *mut Interpreter)
}

unsafe extern "C" fn version() -> *const c_char {
    b"fake-lite-2.3.0\0".as_ptr() as *const c_char
}

unsafe extern "C" fn model_create(data: *const c_void, size: usize) -> *mut TfLiteModel {
    let bytes = std::slice::from_raw_parts(data as *const u8, size);
    match parse_model(bytes) {
        Some(model) => boxed(model),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn model_create_from_file(path: *const c_char) -> *mut TfLiteModel {
    let path = CStr::from_ptr(path).to_string_lossy().into_owned();
    match std::fs::read(path).ok().as_deref().and_then(parse_model) {
        Some(model) => boxed(model),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn model_delete(m: *mut TfLiteModel) {
    release::<Model, _>(m);
}

unsafe extern "C" fn options_create() -> *mut TfLiteInterpreterOptions {
    boxed(Options {
        num_threads: -1,
        reporter: None,
    })
}

unsafe extern "C" fn options_delete(o: *mut TfLiteInterpreterOptions) {
    release::<Options, _>(o);
}

unsafe extern "C" fn options_set_num_threads(o: *mut TfLiteInterpreterOptions, n: i32) {
    (*(o as *mut Options)).num_threads = n;
}

unsafe extern "C" fn options_set_error_reporter(
    o: *mut TfLiteInterpreterOptions,
    reporter: Option<ErrorReporter>,
    _user_data: *mut c_void,
) {
    (*(o as *mut Options)).reporter = reporter;
}

unsafe extern "C" fn interpreter_create(
    model: *const TfLiteModel,
    options: *const TfLiteInterpreterOptions,
) -> *mut TfLiteInterpreter {
    let model = &*(model as *const Model);
    let options = &*(options as *const Options);
    LAST_NUM_THREADS.with(|c| c.set(options.num_threads));
    REPORTER_INSTALLED.with(|c| c.set(options.reporter.is_some()));
    boxed(Interpreter {
        input: new_tensor(vec![1, INPUT_WIDTH as i32], "input".to_string()),
        outputs: Vec::new(),
        num_outputs: model.outputs,
        fail_allocate: model.fail_allocate,
        allocated: false,
    })
}

unsafe extern "C" fn interpreter_delete(i: *mut TfLiteInterpreter) {
    release::<Interpreter, _>(i);
}

unsafe extern "C" fn input_count(i: *const TfLiteInterpreter) -> i32 {
    let _ = interpreter(i);
    1
}

unsafe extern "C" fn input_tensor(i: *const TfLiteInterpreter, index: i32) -> *mut TfLiteTensor {
    if index != 0 {
        return std::ptr::null_mut();
    }
    &mut *interpreter(i).input as *mut Tensor as *mut TfLiteTensor
}

unsafe extern "C" fn resize_input(
    i: *mut TfLiteInterpreter,
    index: i32,
    dims: *const c_int,
    dims_size: i32,
) -> TfLiteStatus {
    let dims = std::slice::from_raw_parts(dims, dims_size.max(0) as usize);
    let valid = index == 0
        && dims.len() == 2
        && dims.iter().all(|d| *d > 0)
        && dims[1] == INPUT_WIDTH as i32;
    if !valid {
        return ERROR;
    }
    let interp = interpreter(i);
    interp.input.dims = dims.to_vec();
    interp.allocated = false;
    kTfLiteOk
}

unsafe extern "C" fn allocate(i: *mut TfLiteInterpreter) -> TfLiteStatus {
    let interp = interpreter(i);
    let injected = FAILING_ALLOCATIONS.with(|c| {
        let pending = c.get();
        c.set(pending.saturating_sub(1));
        pending > 0
    });
    if interp.fail_allocate || injected {
        interp.allocated = false;
        return ERROR;
    }
    let dims = interp.input.dims.clone();
    interp.input = new_tensor(dims.clone(), "input".to_string());
    interp.outputs = (0..interp.num_outputs)
        .map(|k| new_tensor(vec![dims[0], 1], format!("output_{}", k)))
        .collect();
    interp.allocated = true;
    kTfLiteOk
}

unsafe extern "C" fn invoke(i: *mut TfLiteInterpreter) -> TfLiteStatus {
    let interp = interpreter(i);
    if !interp.allocated {
        return ERROR;
    }
    let sums: Vec<f32> = interp
        .input
        .data
        .chunks_exact(4 * INPUT_WIDTH as usize)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .sum()
        })
        .collect();
    for (k, output) in interp.outputs.iter_mut().enumerate() {
        output.data = sums.iter().flat_map(|s| (s + k as f32).to_ne_bytes()).collect();
    }
    kTfLiteOk
}

unsafe extern "C" fn output_count(i: *const TfLiteInterpreter) -> i32 {
    interpreter(i).num_outputs as i32
}

unsafe extern "C" fn output_tensor(i: *const TfLiteInterpreter, index: i32) -> *const TfLiteTensor {
    match interpreter(i).outputs.get(index as usize) {
        Some(t) => &**t as *const Tensor as *const TfLiteTensor,
        None => std::ptr::null(),
    }
}

unsafe extern "C" fn tensor_type(_t: *const TfLiteTensor) -> TfLiteType {
    FLOAT32
}

unsafe extern "C" fn tensor_num_dims(t: *const TfLiteTensor) -> i32 {
    tensor(t).dims.len() as i32
}

unsafe extern "C" fn tensor_dim(t: *const TfLiteTensor, index: i32) -> i32 {
    tensor(t).dims[index as usize]
}

unsafe extern "C" fn tensor_byte_size(t: *const TfLiteTensor) -> usize {
    tensor(t).data.len()
}

unsafe extern "C" fn tensor_name(t: *const TfLiteTensor) -> *const c_char {
    tensor(t).name.as_ptr()
}

unsafe extern "C" fn copy_from_buffer(
    t: *mut TfLiteTensor,
    data: *const c_void,
    size: usize,
) -> TfLiteStatus {
    let tensor = tensor(t);
    if size != tensor.data.len() {
        return ERROR;
    }
    std::ptr::copy_nonoverlapping(data as *const u8, tensor.data.as_mut_ptr(), size);
    kTfLiteOk
}

unsafe extern "C" fn copy_to_buffer(
    t: *const TfLiteTensor,
    data: *mut c_void,
    size: usize,
) -> TfLiteStatus {
    let tensor = tensor(t);
    if size != tensor.data.len() {
        return ERROR;
    }
    std::ptr::copy_nonoverlapping(tensor.data.as_ptr(), data as *mut u8, size);
    kTfLiteOk
}

pub(crate) fn functions() -> LiteFunctions {
    LiteFunctions {
        TfLiteVersion: version,

        TfLiteModelCreate: model_create,
        TfLiteModelCreateFromFile: model_create_from_file,
        TfLiteModelDelete: model_delete,

        TfLiteInterpreterOptionsCreate: options_create,
        TfLiteInterpreterOptionsDelete: options_delete,
        TfLiteInterpreterOptionsSetNumThreads: options_set_num_threads,
        TfLiteInterpreterOptionsSetErrorReporter: options_set_error_reporter,

        TfLiteInterpreterCreate: interpreter_create,
        TfLiteInterpreterDelete: interpreter_delete,
        TfLiteInterpreterGetInputTensorCount: input_count,
        TfLiteInterpreterGetInputTensor: input_tensor,
        TfLiteInterpreterResizeInputTensor: resize_input,
        TfLiteInterpreterAllocateTensors: allocate,
        TfLiteInterpreterInvoke: invoke,
        TfLiteInterpreterGetOutputTensorCount: output_count,
        TfLiteInterpreterGetOutputTensor: output_tensor,

        TfLiteTensorType: tensor_type,
        TfLiteTensorNumDims: tensor_num_dims,
        TfLiteTensorDim: tensor_dim,
        TfLiteTensorByteSize: tensor_byte_size,
        TfLiteTensorName: tensor_name,
        TfLiteTensorCopyFromBuffer: copy_from_buffer,
        TfLiteTensorCopyToBuffer: copy_to_buffer,
    }
}
