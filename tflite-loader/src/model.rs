//! TFLite models
//!
//! A [`LiteModel`] owns a flatbuffer model, its interpreter options and the
//! interpreter, and addresses inputs and outputs by position ("slots").
//! Inputs whose shape differs from the slot trigger a resize and a full
//! reallocation before the bytes are copied in.

use crate::error::{LiteError, Result};
use crate::ffi::{kTfLiteOk, TfLiteInterpreter, TfLiteInterpreterOptions, TfLiteModel, TfLiteTensor};
use crate::reporter;
use crate::runtime::LiteRuntime;
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString};
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use tfwrap_common::{DataType, HostTensor, Owned, TensorError, TfliteConfig};

/// Interpreter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiteModelConfig {
    /// Interpreter worker threads
    pub num_threads: i32,

    /// Make [`LiteModel::invoke`] fail on a model with more than one output
    /// instead of returning the first
    pub strict_outputs: bool,
}

impl Default for LiteModelConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            strict_outputs: false,
        }
    }
}

impl LiteModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the runtime configuration
    pub fn from_runtime_config(config: &TfliteConfig) -> Self {
        Self {
            num_threads: config.num_threads,
            strict_outputs: config.strict_outputs,
        }
    }

    pub fn with_num_threads(mut self, num_threads: i32) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_strict_outputs(mut self, strict: bool) -> Self {
        self.strict_outputs = strict;
        self
    }
}

/// A model handle plus the bytes it was created from, if any.
///
/// `TfLiteModelCreate` does not copy its buffer, so the bytes are dropped
/// after the model.
struct Flatbuffer {
    model: Owned<TfLiteModel>,
    _bytes: Option<Vec<u8>>,
}

/// A loaded TFLite model and its interpreter
pub struct LiteModel {
    // Interpreter first: it must go before the options and model.
    interpreter: Owned<TfLiteInterpreter>,
    _options: Owned<TfLiteInterpreterOptions>,
    _flatbuffer: Flatbuffer,
    inputs: Vec<*mut TfLiteTensor>,
    outputs: Vec<*const TfLiteTensor>,
    reallocations: usize,
    // Set while the last AllocateTensors call failed
    needs_allocation: bool,
    warned_outputs: bool,
    source: String,
    config: LiteModelConfig,
    runtime: Arc<LiteRuntime>,
}

impl LiteModel {
    /// Load a `.tflite` file
    ///
    /// # Example
    /// ```no_run
    /// use tflite_loader::{HostTensor, LiteModel, LiteModelConfig, LiteRuntime};
    ///
    /// let runtime = LiteRuntime::load("libtensorflowlite_c.so")?;
    /// let mut model = LiteModel::from_file(&runtime, "model.tflite", LiteModelConfig::default())?;
    /// let output = model.invoke(&[HostTensor::new(&[0.5f32; 4], vec![1, 4])])?;
    /// println!("{:?}", output.to_vec::<f32>()?);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(
        runtime: &Arc<LiteRuntime>,
        path: P,
        config: LiteModelConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|e| LiteError::ModelLoad(format!("{}: {}", source, e)))?;

        let f = runtime.functions();
        // SAFETY: c_path is NUL-terminated; the model is released with
        // TfLiteModelDelete.
        let model = unsafe {
            Owned::from_raw(
                (f.TfLiteModelCreateFromFile)(c_path.as_ptr()),
                f.TfLiteModelDelete,
                "TfLiteModel",
            )
        }
        .ok_or_else(|| LiteError::ModelLoad(source.clone()))?;

        Self::build(
            runtime,
            Flatbuffer {
                model,
                _bytes: None,
            },
            source,
            config,
        )
    }

    /// Load a model from an in-memory flatbuffer
    pub fn from_bytes(
        runtime: &Arc<LiteRuntime>,
        bytes: Vec<u8>,
        config: LiteModelConfig,
    ) -> Result<Self> {
        let source = format!("<{} bytes>", bytes.len());
        let f = runtime.functions();
        // SAFETY: bytes outlives the model (see Flatbuffer); moving the Vec
        // does not move its heap buffer.
        let model = unsafe {
            Owned::from_raw(
                (f.TfLiteModelCreate)(bytes.as_ptr() as *const c_void, bytes.len()),
                f.TfLiteModelDelete,
                "TfLiteModel",
            )
        }
        .ok_or_else(|| LiteError::ModelLoad(source.clone()))?;

        Self::build(
            runtime,
            Flatbuffer {
                model,
                _bytes: Some(bytes),
            },
            source,
            config,
        )
    }

    fn build(
        runtime: &Arc<LiteRuntime>,
        flatbuffer: Flatbuffer,
        source: String,
        config: LiteModelConfig,
    ) -> Result<Self> {
        let f = runtime.functions();

        // SAFETY: no preconditions; released with TfLiteInterpreterOptionsDelete.
        let options = unsafe {
            Owned::from_raw(
                (f.TfLiteInterpreterOptionsCreate)(),
                f.TfLiteInterpreterOptionsDelete,
                "TfLiteInterpreterOptions",
            )
        }
        .ok_or_else(|| LiteError::InterpreterCreation(source.clone()))?;

        // SAFETY: options is live; the reporter ignores its user data.
        unsafe {
            (f.TfLiteInterpreterOptionsSetNumThreads)(options.as_ptr(), config.num_threads);
            (f.TfLiteInterpreterOptionsSetErrorReporter)(
                options.as_ptr(),
                Some(reporter::report),
                ptr::null_mut(),
            );
        }

        // SAFETY: model and options are live and outlive the interpreter.
        let interpreter = unsafe {
            Owned::from_raw(
                (f.TfLiteInterpreterCreate)(flatbuffer.model.as_ptr(), options.as_ptr()),
                f.TfLiteInterpreterDelete,
                "TfLiteInterpreter",
            )
        }
        .ok_or_else(|| LiteError::InterpreterCreation(source.clone()))?;

        // SAFETY: interpreter is live.
        if unsafe { (f.TfLiteInterpreterAllocateTensors)(interpreter.as_ptr()) } != kTfLiteOk {
            return Err(LiteError::Allocation(source));
        }

        let mut model = Self {
            interpreter,
            _options: options,
            _flatbuffer: flatbuffer,
            inputs: Vec::new(),
            outputs: Vec::new(),
            reallocations: 0,
            needs_allocation: false,
            warned_outputs: false,
            source,
            config,
            runtime: Arc::clone(runtime),
        };
        model.refresh_slots();

        if model.inputs.is_empty() {
            return Err(LiteError::NoSlots("input"));
        }
        if model.outputs.is_empty() {
            return Err(LiteError::NoSlots("output"));
        }

        log::info!(
            "Loaded TFLite model {} ({} input(s), {} output(s), {} thread(s))",
            model.source,
            model.inputs.len(),
            model.outputs.len(),
            model.config.num_threads
        );
        Ok(model)
    }

    /// Run the model and return its first output.
    ///
    /// Takes one host tensor per input slot. A model with several outputs
    /// logs a warning once and only the first output is returned, unless
    /// `strict_outputs` is set, in which case the call fails.
    pub fn invoke(&mut self, inputs: &[HostTensor]) -> Result<HostTensor> {
        let count = self.outputs.len();
        if count > 1 {
            if self.config.strict_outputs {
                return Err(LiteError::MultipleOutputs(count));
            }
            if !self.warned_outputs {
                log::warn!(
                    "Model {} has {} outputs; invoke returns only the first",
                    self.source,
                    count
                );
                self.warned_outputs = true;
            }
        }
        self.run(inputs)?;
        self.read_output(0)
    }

    /// Run the model and return every output, in slot order
    pub fn invoke_all(&mut self, inputs: &[HostTensor]) -> Result<Vec<HostTensor>> {
        self.run(inputs)?;
        (0..self.outputs.len()).map(|i| self.read_output(i)).collect()
    }

    fn run(&mut self, inputs: &[HostTensor]) -> Result<()> {
        if inputs.len() != self.inputs.len() {
            return Err(LiteError::InputCount {
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }

        for (index, input) in inputs.iter().enumerate() {
            let expected = self.input_dtype(index)?;
            if input.dtype() != expected {
                return Err(TensorError::TypeMismatch {
                    expected,
                    actual: input.dtype(),
                }
                .into());
            }
            if self.input_dims(index)?.as_slice() != input.dims() {
                self.resize_and_reallocate(index, input.dims())?;
            }
        }

        // A failed reallocation leaves the slots at the new shape but
        // unplanned, so the matching-shape retry has to allocate again.
        if self.needs_allocation {
            self.allocate()?;
            self.reallocations += 1;
        }

        for (index, input) in inputs.iter().enumerate() {
            self.copy_in(index, input)?;
        }

        log::debug!("Invoking {}", self.source);
        let f = self.runtime.functions();
        // SAFETY: interpreter is live and every input has been filled.
        if unsafe { (f.TfLiteInterpreterInvoke)(self.interpreter.as_ptr()) } != kTfLiteOk {
            return Err(LiteError::Invoke);
        }
        Ok(())
    }

    /// Resize one input slot and reallocate every tensor.
    ///
    /// All slot pointers are refreshed afterwards, whether or not the
    /// reallocation succeeded.
    pub fn resize_and_reallocate(&mut self, index: usize, dims: &[i64]) -> Result<()> {
        self.input_slot(index)?;
        let resize_error = || LiteError::Resize {
            index,
            dims: dims.to_vec(),
        };
        let c_dims = dims
            .iter()
            .map(|&d| c_int::try_from(d))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| resize_error())?;

        let f = self.runtime.functions();
        // SAFETY: interpreter is live; c_dims holds c_dims.len() entries.
        let resized = unsafe {
            (f.TfLiteInterpreterResizeInputTensor)(
                self.interpreter.as_ptr(),
                index as i32,
                c_dims.as_ptr(),
                c_dims.len() as i32,
            )
        };
        if resized != kTfLiteOk {
            return Err(resize_error());
        }

        self.allocate()?;
        self.reallocations += 1;
        log::debug!("Resized input {} of {} to {:?}", index, self.source, dims);
        Ok(())
    }

    /// Plan every tensor and refresh the slots, remembering a failure so
    /// the next run allocates again
    fn allocate(&mut self) -> Result<()> {
        let f = self.runtime.functions();
        // SAFETY: interpreter is live.
        let allocated = unsafe { (f.TfLiteInterpreterAllocateTensors)(self.interpreter.as_ptr()) };
        self.refresh_slots();
        self.needs_allocation = allocated != kTfLiteOk;
        if self.needs_allocation {
            log::warn!("Tensor allocation failed for {}", self.source);
            return Err(LiteError::Allocation(self.source.clone()));
        }
        Ok(())
    }

    /// Re-read the slot pointers; reallocation invalidates the old ones
    fn refresh_slots(&mut self) {
        let runtime = Arc::clone(&self.runtime);
        let f = runtime.functions();
        let interpreter = self.interpreter.as_ptr();
        // SAFETY: interpreter is live and indices stay below the counts it
        // reports.
        unsafe {
            let inputs = (f.TfLiteInterpreterGetInputTensorCount)(interpreter).max(0);
            self.inputs = (0..inputs)
                .map(|i| (f.TfLiteInterpreterGetInputTensor)(interpreter, i))
                .collect();
            let outputs = (f.TfLiteInterpreterGetOutputTensorCount)(interpreter).max(0);
            self.outputs = (0..outputs)
                .map(|i| (f.TfLiteInterpreterGetOutputTensor)(interpreter, i))
                .collect();
        }
    }

    fn copy_in(&self, index: usize, input: &HostTensor) -> Result<()> {
        let slot = self.input_slot(index)?;
        let bytes = input.as_bytes();
        let f = self.runtime.functions();
        // SAFETY: slot is a live input tensor; the runtime checks the size.
        let status = unsafe {
            (f.TfLiteTensorCopyFromBuffer)(slot, bytes.as_ptr() as *const c_void, bytes.len())
        };
        if status != kTfLiteOk {
            return Err(LiteError::Copy {
                kind: "input",
                index,
                len: bytes.len(),
            });
        }
        Ok(())
    }

    fn read_output(&self, index: usize) -> Result<HostTensor> {
        let slot = self.output_slot(index)?;
        let dtype = self.tensor_dtype(slot)?;
        let dims = self.tensor_dims(slot);
        let f = self.runtime.functions();

        // SAFETY: slot is a live output tensor.
        let len = unsafe { (f.TfLiteTensorByteSize)(slot) };
        let mut data = vec![0u8; len];
        if len > 0 {
            let dst = data.as_mut_ptr() as *mut c_void;
            // SAFETY: dst has exactly len bytes.
            let status = unsafe { (f.TfLiteTensorCopyToBuffer)(slot, dst, len) };
            if status != kTfLiteOk {
                return Err(LiteError::Copy {
                    kind: "output",
                    index,
                    len,
                });
            }
        }
        Ok(HostTensor::from_raw_parts(dtype, dims, data))
    }

    fn input_slot(&self, index: usize) -> Result<*mut TfLiteTensor> {
        self.inputs
            .get(index)
            .copied()
            .filter(|p| !p.is_null())
            .ok_or(LiteError::SlotIndex {
                kind: "input",
                index,
                count: self.inputs.len(),
            })
    }

    fn output_slot(&self, index: usize) -> Result<*const TfLiteTensor> {
        self.outputs
            .get(index)
            .copied()
            .filter(|p| !p.is_null())
            .ok_or(LiteError::SlotIndex {
                kind: "output",
                index,
                count: self.outputs.len(),
            })
    }

    fn tensor_dims(&self, tensor: *const TfLiteTensor) -> Vec<i64> {
        let f = self.runtime.functions();
        // SAFETY: tensor is a live slot; indices stay below its rank.
        unsafe {
            let rank = (f.TfLiteTensorNumDims)(tensor).max(0);
            (0..rank).map(|i| (f.TfLiteTensorDim)(tensor, i) as i64).collect()
        }
    }

    fn tensor_dtype(&self, tensor: *const TfLiteTensor) -> Result<DataType> {
        let f = self.runtime.functions();
        // SAFETY: tensor is a live slot.
        Ok(DataType::from_tflite(unsafe { (f.TfLiteTensorType)(tensor) })?)
    }

    fn tensor_name(&self, tensor: *const TfLiteTensor) -> String {
        let f = self.runtime.functions();
        // SAFETY: the name is owned by the live tensor.
        unsafe {
            let raw = (f.TfLiteTensorName)(tensor);
            if raw.is_null() {
                return String::new();
            }
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Current shape of an input slot
    pub fn input_dims(&self, index: usize) -> Result<Vec<i64>> {
        Ok(self.tensor_dims(self.input_slot(index)?))
    }

    /// Current shape of an output slot
    pub fn output_dims(&self, index: usize) -> Result<Vec<i64>> {
        Ok(self.tensor_dims(self.output_slot(index)?))
    }

    pub fn input_dtype(&self, index: usize) -> Result<DataType> {
        self.tensor_dtype(self.input_slot(index)?)
    }

    pub fn output_dtype(&self, index: usize) -> Result<DataType> {
        self.tensor_dtype(self.output_slot(index)?)
    }

    pub fn input_name(&self, index: usize) -> Result<String> {
        Ok(self.tensor_name(self.input_slot(index)?))
    }

    pub fn output_name(&self, index: usize) -> Result<String> {
        Ok(self.tensor_name(self.output_slot(index)?))
    }

    /// Number of resize-and-reallocate cycles since load
    pub fn reallocation_count(&self) -> usize {
        self.reallocations
    }

    pub fn config(&self) -> &LiteModelConfig {
        &self.config
    }
}

impl Drop for LiteModel {
    fn drop(&mut self) {
        log::info!("Freed TFLite model: {}", self.source);
    }
}

// SAFETY: The interpreter and its slot pointers are only touched through
// this value, and every mutating call takes `&mut self`.
unsafe impl Send for LiteModel {}
