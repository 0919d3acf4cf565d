//! TF Loader - dynamic bindings to the TensorFlow C library
//!
//! The C library is opened at runtime with `libloading` and resolved into a
//! typed function table, so nothing links against TensorFlow at build time.
//!
//! - [`Runtime`]: the loaded library, its status object and the eager
//!   context; shared through `Arc` by everything below
//! - [`Tensor`]: an eager tensor handle with typed construction and
//!   extraction, including `TF_STRING` tensors
//! - [`Model`]: a saved model or frozen graph bound to a session, run
//!   against named `op[:index]` endpoints
//!
//! String tensors use the offset-table layout of TensorFlow 2.3 and earlier.

pub mod error;
pub mod ffi;
pub mod model;
pub mod runtime;
mod string;
pub mod tensor;

#[cfg(test)]
mod fake;

use std::sync::Arc;
use tfwrap_common::RuntimeConfig;

pub use error::{Result, StatusCode, TfError};
pub use model::{Model, ModelConfig, ModelFormat, DEFAULT_INPUT, DEFAULT_OUTPUT, DEFAULT_TAG};
pub use runtime::Runtime;
pub use tensor::Tensor;
pub use tfwrap_common::{DataType, HostTensor, TensorElement};

/// Load the runtime named by `TFWRAP_TENSORFLOW_LIBRARY`, or the platform
/// default library name
pub fn load_from_env() -> Result<Arc<Runtime>> {
    let config = RuntimeConfig::from_env();
    log::debug!("Loading TensorFlow from {}", config.tensorflow.library.display());
    Runtime::from_config(&config.tensorflow)
}
