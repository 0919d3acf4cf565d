use crate::dtype::DataType;
use thiserror::Error;

/// Errors raised while encoding or decoding tensor buffers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("Type mismatch: requested {expected}, tensor holds {actual}")]
    TypeMismatch { expected: DataType, actual: DataType },

    #[error("Unknown runtime datatype code: {0}")]
    UnknownDataType(i32),

    #[error("Datatype {0} has no fixed element size")]
    VariableLength(DataType),

    #[error("Buffer of {len} bytes is not a whole number of {dtype} elements")]
    ByteLength { dtype: DataType, len: usize },
}

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
