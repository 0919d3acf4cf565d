use tfwrap_common::TensorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LiteError>;

#[derive(Error, Debug)]
pub enum LiteError {
    #[error("Failed to load TFLite library: {0}")]
    LibraryLoad(String),

    #[error("FFI error: {0}")]
    Ffi(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create interpreter for {0}")]
    InterpreterCreation(String),

    #[error("Failed to allocate tensors: {0}")]
    Allocation(String),

    #[error("Model declares no {0} tensors")]
    NoSlots(&'static str),

    #[error("Expected {expected} input(s), got {actual}")]
    InputCount { expected: usize, actual: usize },

    #[error("No {kind} tensor at index {index} (model has {count})")]
    SlotIndex {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Failed to resize input {index} to {dims:?}")]
    Resize { index: usize, dims: Vec<i64> },

    #[error("Failed to copy {kind} tensor {index} ({len} bytes)")]
    Copy {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Interpreter invocation failed")]
    Invoke,

    #[error("Model has {0} outputs; use invoke_all to read them")]
    MultipleOutputs(usize),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
