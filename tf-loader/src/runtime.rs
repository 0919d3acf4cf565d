//! Process-scoped TensorFlow state
//!
//! A [`Runtime`] owns the loaded library, its function table, the status
//! object every call reports into, and the eager execution context shared
//! by all tensors. Tensors and models hold an `Arc<Runtime>`, so the
//! runtime is torn down only after the last object depending on it.

use crate::error::{Result, StatusCode, TfError};
use crate::ffi::{TFE_Context, TF_Status, TfFunctions, TF_OK};
use libloading::Library;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;
use tfwrap_common::{Owned, TensorflowConfig};

pub struct Runtime {
    // Field order is drop order: handles go before the library.
    status: Mutex<Owned<TF_Status>>,
    context: Owned<TFE_Context>,
    functions: TfFunctions,
    _library: Option<Library>,
}

impl Runtime {
    /// Load the TensorFlow C library and create the status and eager context
    ///
    /// # Example
    /// ```no_run
    /// use tf_loader::Runtime;
    ///
    /// let runtime = Runtime::load("/opt/tf/lib/libtensorflow.so")?;
    /// println!("TensorFlow {}", runtime.version());
    /// # Ok::<(), tf_loader::TfError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(library_path: P) -> Result<Arc<Self>> {
        let path = library_path.as_ref();

        // SAFETY: Loading a shared library runs its initialisers. The
        // library is only used through the typed table built below.
        let library = unsafe {
            Library::new(path).map_err(|e| {
                TfError::LibraryLoad(format!("Failed to load {}: {}", path.display(), e))
            })?
        };
        let functions = TfFunctions::load(&library)?;
        if functions.strings.is_none() {
            log::warn!(
                "{} does not export the TF_STRING codec; string tensors are unavailable",
                path.display()
            );
        }
        let runtime = Self::with_functions(functions, Some(library))?;

        log::info!(
            "Loaded TensorFlow {} from {}",
            runtime.version(),
            path.display()
        );
        Ok(runtime)
    }

    /// Load the library named in the configuration
    pub fn from_config(config: &TensorflowConfig) -> Result<Arc<Self>> {
        Self::load(&config.library)
    }

    /// Build a runtime around an already resolved function table
    pub(crate) fn with_functions(
        functions: TfFunctions,
        library: Option<Library>,
    ) -> Result<Arc<Self>> {
        // SAFETY: TF_NewStatus has no preconditions; the result is released
        // with TF_DeleteStatus.
        let status = unsafe {
            Owned::from_raw((functions.TF_NewStatus)(), functions.TF_DeleteStatus, "TF_Status")
        }
        .ok_or(TfError::NullHandle("TF_Status"))?;

        // SAFETY: The options object is only read by TFE_NewContext and
        // released right after.
        let options = unsafe {
            Owned::from_raw(
                (functions.TFE_NewContextOptions)(),
                functions.TFE_DeleteContextOptions,
                "TFE_ContextOptions",
            )
        }
        .ok_or(TfError::NullHandle("TFE_ContextOptions"))?;

        // SAFETY: options and status are live handles.
        let raw_context = unsafe { (functions.TFE_NewContext)(options.as_ptr(), status.as_ptr()) };
        // SAFETY: status is live.
        unsafe { check_status(&functions, status.as_ptr(), "TFE_NewContext") }?;
        // SAFETY: raw_context is a fresh context released with TFE_DeleteContext.
        let context =
            unsafe { Owned::from_raw(raw_context, functions.TFE_DeleteContext, "TFE_Context") }
                .ok_or(TfError::NullHandle("TFE_Context"))?;
        drop(options);

        Ok(Arc::new(Self {
            status: Mutex::new(status),
            context,
            functions,
            _library: library,
        }))
    }

    /// Run one runtime call that reports into the shared status object.
    ///
    /// The status lock is held for the duration of `f`, which serialises
    /// status use across threads. `f` must not call back into the runtime.
    /// If the status reports a failure the value returned by `f` is dropped
    /// and the failure is returned instead.
    pub(crate) fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&TfFunctions, *mut TF_Status) -> T,
    {
        let status = self.status.lock();
        let value = f(&self.functions, status.as_ptr());
        // SAFETY: status is live and locked.
        unsafe { check_status(&self.functions, status.as_ptr(), operation) }?;
        Ok(value)
    }

    pub(crate) fn functions(&self) -> &TfFunctions {
        &self.functions
    }

    pub(crate) fn context_ptr(&self) -> *mut TFE_Context {
        self.context.as_ptr()
    }

    /// Version string reported by the library
    pub fn version(&self) -> String {
        // SAFETY: TF_Version returns a static NUL-terminated string.
        unsafe {
            let raw = (self.functions.TF_Version)();
            if raw.is_null() {
                return String::from("unknown");
            }
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        log::info!("Releasing TensorFlow runtime");
    }
}

/// Turn a non-OK status into a `TfError::Status`
///
/// # Safety
/// `status` must be a live status object.
unsafe fn check_status(
    functions: &TfFunctions,
    status: *mut TF_Status,
    operation: &'static str,
) -> Result<()> {
    let code = (functions.TF_GetCode)(status);
    if code == TF_OK {
        return Ok(());
    }
    let raw = (functions.TF_Message)(status);
    let message = if raw.is_null() {
        String::new()
    } else {
        CStr::from_ptr(raw).to_string_lossy().into_owned()
    };
    log::debug!("{} returned status {}: {}", operation, code, message);
    Err(TfError::Status {
        operation,
        code: StatusCode::from_raw(code),
        message,
    })
}
