//! TFLite Loader - dynamic bindings to the TensorFlow Lite C library
//!
//! The library is opened at runtime and resolved into a typed function
//! table. [`LiteModel`] wraps a model, its interpreter options and the
//! interpreter, taking and returning [`HostTensor`]s by slot position.
//! Runtime diagnostics go through an installed error reporter to stderr and
//! the `log` facade.

pub mod error;
pub mod ffi;
pub mod model;
mod reporter;
pub mod runtime;

#[cfg(test)]
mod fake;

use std::sync::Arc;
use tfwrap_common::RuntimeConfig;

pub use error::{LiteError, Result};
pub use model::{LiteModel, LiteModelConfig};
pub use runtime::LiteRuntime;
pub use tfwrap_common::{DataType, HostTensor, TensorElement};

/// Load the runtime named by `TFWRAP_TFLITE_LIBRARY`, or the platform
/// default library name
pub fn load_from_env() -> Result<Arc<LiteRuntime>> {
    let config = RuntimeConfig::from_env();
    log::debug!("Loading TFLite from {}", config.tflite.library.display());
    LiteRuntime::from_config(&config.tflite)
}
