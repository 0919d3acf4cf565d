//! Shared types for the tfwrap loader crates.
//!
//! This crate sits at the bottom of the dependency hierarchy and knows
//! nothing about either runtime's C API:
//! - [`DataType`] and the [`TensorElement`] native-type mapping
//! - [`HostTensor`], an owned tensor in Rust memory
//! - [`RuntimeConfig`], the TOML/environment configuration
//! - [`Owned`], a native handle paired with its release function
//! - error types shared by both loaders

pub mod config;
pub mod dtype;
pub mod error;
pub mod handle;
pub mod host;

pub use config::{RuntimeConfig, RuntimeKind, TensorflowConfig, TfliteConfig};
pub use dtype::{decode_elements, element_count, encode_elements, DataType, TensorElement};
pub use error::{ConfigError, TensorError};
pub use handle::{Owned, Release};
pub use host::HostTensor;
