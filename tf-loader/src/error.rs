use std::fmt;
use tfwrap_common::TensorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TfError>;

/// Canonical TensorFlow status codes (`TF_Code`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
    Other(i32),
}

impl StatusCode {
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "code {}", code),
            named => write!(f, "{:?}", named),
        }
    }
}

#[derive(Error, Debug)]
pub enum TfError {
    #[error("Failed to load TensorFlow library: {0}")]
    LibraryLoad(String),

    #[error("FFI error: {0}")]
    Ffi(String),

    /// Failure reported through the runtime's status object
    #[error("{operation} failed ({code}): {message}")]
    Status {
        operation: &'static str,
        code: StatusCode,
        message: String,
    },

    #[error("Runtime returned no {0}")]
    NullHandle(&'static str),

    #[error("Endpoint not found in graph: {0}")]
    UnresolvedEndpoint(String),

    #[error("Expected {expected} {kind}(s), got {actual}")]
    EndpointCount {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid string tensor: {0}")]
    InvalidString(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl TfError {
    /// Status code of a runtime failure, if this is one
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}
