//! Runtime configuration
//!
//! Configuration is read from TOML and can be overridden from the
//! environment:
//!
//! ```toml
//! [tensorflow]
//! library = "/opt/tf/lib/libtensorflow.so"
//! strict_resolution = false
//!
//! [tflite]
//! library = "/opt/tflite/lib/libtensorflowlite_c.so"
//! num_threads = 1
//! strict_outputs = false
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`TensorflowConfig::library`]
pub const TENSORFLOW_LIBRARY_ENV: &str = "TFWRAP_TENSORFLOW_LIBRARY";

/// Environment variable overriding [`TfliteConfig::library`]
pub const TFLITE_LIBRARY_ENV: &str = "TFWRAP_TFLITE_LIBRARY";

/// Which runtime a shared library belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Tensorflow,
    Tflite,
}

impl RuntimeKind {
    /// Platform-specific file name of the runtime's C library
    pub fn library_name(self) -> &'static str {
        match self {
            Self::Tensorflow => {
                #[cfg(target_os = "windows")]
                { "tensorflow.dll" }

                #[cfg(target_os = "macos")]
                { "libtensorflow.dylib" }

                #[cfg(not(any(target_os = "windows", target_os = "macos")))]
                { "libtensorflow.so" }
            }
            Self::Tflite => {
                #[cfg(target_os = "windows")]
                { "tensorflowlite_c.dll" }

                #[cfg(target_os = "macos")]
                { "libtensorflowlite_c.dylib" }

                #[cfg(not(any(target_os = "windows", target_os = "macos")))]
                { "libtensorflowlite_c.so" }
            }
        }
    }
}

/// Settings for the graph-mode runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorflowConfig {
    /// Path to the TensorFlow C library
    pub library: PathBuf,

    /// Fail model construction on an unresolved endpoint name instead of
    /// dropping it and every name after it
    pub strict_resolution: bool,
}

impl Default for TensorflowConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from(RuntimeKind::Tensorflow.library_name()),
            strict_resolution: false,
        }
    }
}

/// Settings for the TFLite runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfliteConfig {
    /// Path to the TFLite C library
    pub library: PathBuf,

    /// Interpreter worker threads
    pub num_threads: i32,

    /// Fail single-output invocation when the model declares more than one
    /// output instead of returning the first
    pub strict_outputs: bool,
}

impl Default for TfliteConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from(RuntimeKind::Tflite.library_name()),
            num_threads: 1,
            strict_outputs: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tensorflow: TensorflowConfig,
    pub tflite: TfliteConfig,
}

impl RuntimeConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded runtime config from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `TFWRAP_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var_os(key).map(PathBuf::from))
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        if let Some(path) = lookup(TENSORFLOW_LIBRARY_ENV) {
            self.tensorflow.library = path;
        }
        if let Some(path) = lookup(TFLITE_LIBRARY_ENV) {
            self.tflite.library = path;
        }
        self
    }
}
