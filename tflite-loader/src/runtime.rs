//! Loaded TFLite library
//!
//! Unlike the graph-mode runtime there is no shared status object: the
//! TFLite C API reports through return codes and the per-interpreter error
//! reporter. A [`LiteRuntime`] is just the library and its function table,
//! kept alive by every model built from it.

use crate::error::{LiteError, Result};
use crate::ffi::LiteFunctions;
use libloading::Library;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;
use tfwrap_common::TfliteConfig;

pub struct LiteRuntime {
    functions: LiteFunctions,
    _library: Option<Library>,
}

impl LiteRuntime {
    /// Load the TFLite C library
    ///
    /// # Example
    /// ```no_run
    /// use tflite_loader::LiteRuntime;
    ///
    /// let runtime = LiteRuntime::load("/opt/tflite/lib/libtensorflowlite_c.so")?;
    /// println!("TFLite {}", runtime.version());
    /// # Ok::<(), tflite_loader::LiteError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(library_path: P) -> Result<Arc<Self>> {
        let path = library_path.as_ref();

        // SAFETY: Loading a shared library runs its initialisers; it is only
        // used through the typed table below.
        let library = unsafe {
            Library::new(path).map_err(|e| {
                LiteError::LibraryLoad(format!("Failed to load {}: {}", path.display(), e))
            })?
        };
        let functions = LiteFunctions::load(&library)?;
        let runtime = Self::with_functions(functions, Some(library));

        log::info!("Loaded TFLite {} from {}", runtime.version(), path.display());
        Ok(runtime)
    }

    pub fn from_config(config: &TfliteConfig) -> Result<Arc<Self>> {
        Self::load(&config.library)
    }

    pub(crate) fn with_functions(functions: LiteFunctions, library: Option<Library>) -> Arc<Self> {
        Arc::new(Self {
            functions,
            _library: library,
        })
    }

    pub(crate) fn functions(&self) -> &LiteFunctions {
        &self.functions
    }

    pub fn version(&self) -> String {
        // SAFETY: TfLiteVersion returns a static NUL-terminated string.
        unsafe {
            let raw = (self.functions.TfLiteVersion)();
            if raw.is_null() {
                return String::from("unknown");
            }
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        }
    }
}

impl Drop for LiteRuntime {
    fn drop(&mut self) {
        log::info!("Releasing TFLite runtime");
    }
}
