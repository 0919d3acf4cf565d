//! Graph-mode models
//!
//! Loads a saved model (or a frozen `GraphDef`) into a graph/session pair
//! and runs it synchronously against named endpoints.

use crate::error::{Result, TfError};
use crate::ffi::{TF_Graph, TF_Operation, TF_Output, TF_Session, TF_Tensor};
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use tfwrap_common::{Owned, TensorflowConfig};

/// Default input endpoint of a Keras-exported saved model
pub const DEFAULT_INPUT: &str = "serving_default_input_1";

/// Default output endpoint of a Keras-exported saved model
pub const DEFAULT_OUTPUT: &str = "StatefulPartitionedCall";

/// Default metagraph tag
pub const DEFAULT_TAG: &str = "serve";

/// On-disk model format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    /// Saved-model directory
    SavedModel,
    /// Single serialized `GraphDef` file
    FrozenGraph,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Saved-model directory or frozen graph file
    pub path: PathBuf,

    pub format: ModelFormat,

    /// Metagraph tags to load (saved models only)
    pub tags: Vec<String>,

    /// Input endpoints, `op` or `op:index`
    pub inputs: Vec<String>,

    /// Output endpoints, `op` or `op:index`
    pub outputs: Vec<String>,

    /// Fail on an unresolved endpoint name. When false, resolution stops at
    /// the first unresolved name and the remaining names are dropped.
    pub strict_resolution: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            format: ModelFormat::SavedModel,
            tags: vec![DEFAULT_TAG.to_string()],
            inputs: vec![DEFAULT_INPUT.to_string()],
            outputs: vec![DEFAULT_OUTPUT.to_string()],
            strict_resolution: false,
        }
    }
}

impl ModelConfig {
    /// Saved model at `path` with default endpoints
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Seed from the runtime configuration
    pub fn from_runtime_config<P: AsRef<Path>>(path: P, config: &TensorflowConfig) -> Self {
        Self::new(path).with_strict_resolution(config.strict_resolution)
    }

    /// Load a frozen graph instead of a saved model
    pub fn frozen_graph(mut self) -> Self {
        self.format = ModelFormat::FrozenGraph;
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inputs<S: Into<String>>(mut self, inputs: impl IntoIterator<Item = S>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<S: Into<String>>(mut self, outputs: impl IntoIterator<Item = S>) -> Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strict_resolution(mut self, strict: bool) -> Self {
        self.strict_resolution = strict;
        self
    }
}

/// A resolved graph endpoint
#[derive(Debug, Clone)]
struct Endpoint {
    name: String,
    output: TF_Output,
}

/// Session bound to a graph; closed and deleted through the status object
struct Session {
    ptr: NonNull<TF_Session>,
    runtime: Arc<Runtime>,
}

impl Drop for Session {
    fn drop(&mut self) {
        let session = self.ptr.as_ptr();
        // SAFETY: session is live and dropped only here.
        if let Err(e) = self
            .runtime
            .call("TF_CloseSession", |f, status| unsafe { (f.TF_CloseSession)(session, status) })
        {
            log::warn!("{}", e);
        }
        // SAFETY: as above; the session is not used after deletion.
        if let Err(e) = self
            .runtime
            .call("TF_DeleteSession", |f, status| unsafe { (f.TF_DeleteSession)(session, status) })
        {
            log::warn!("{}", e);
        }
    }
}

/// A loaded graph-mode model
pub struct Model {
    // Session must be released before the graph it runs.
    session: Session,
    graph: Owned<TF_Graph>,
    inputs: Vec<Endpoint>,
    outputs: Vec<Endpoint>,
    config: ModelConfig,
    runtime: Arc<Runtime>,
}

impl Model {
    /// Load a model and resolve its configured endpoints
    ///
    /// # Example
    /// ```no_run
    /// use tf_loader::{Model, ModelConfig, Runtime, Tensor};
    ///
    /// let runtime = Runtime::load("libtensorflow.so")?;
    /// let model = Model::load(&runtime, ModelConfig::new("models/dense"))?;
    /// let input = Tensor::new(&runtime, &vec![1.0f32; 50], &[10, 5])?;
    /// let output = model.run(&input)?;
    /// # Ok::<(), tf_loader::TfError>(())
    /// ```
    pub fn load(runtime: &Arc<Runtime>, config: ModelConfig) -> Result<Self> {
        let f = runtime.functions();

        // SAFETY: TF_NewGraph has no preconditions.
        let graph = unsafe { Owned::from_raw((f.TF_NewGraph)(), f.TF_DeleteGraph, "TF_Graph") }
            .ok_or(TfError::NullHandle("TF_Graph"))?;
        // SAFETY: TF_NewSessionOptions has no preconditions.
        let options = unsafe {
            Owned::from_raw(
                (f.TF_NewSessionOptions)(),
                f.TF_DeleteSessionOptions,
                "TF_SessionOptions",
            )
        }
        .ok_or(TfError::NullHandle("TF_SessionOptions"))?;

        let raw_session = match config.format {
            ModelFormat::SavedModel => {
                let export_dir = path_to_cstring(&config.path)?;
                let tags = config
                    .tags
                    .iter()
                    .map(|t| {
                        CString::new(t.as_str()).map_err(|e| TfError::InvalidPath(e.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let tag_ptrs: Vec<*const c_char> = tags.iter().map(|t| t.as_ptr()).collect();

                runtime.call("TF_LoadSessionFromSavedModel", |f, status| {
                    // SAFETY: every pointer argument is live for the call;
                    // null run options and metagraph are allowed.
                    unsafe {
                        (f.TF_LoadSessionFromSavedModel)(
                            options.as_ptr(),
                            ptr::null(),
                            export_dir.as_ptr(),
                            tag_ptrs.as_ptr(),
                            tag_ptrs.len() as c_int,
                            graph.as_ptr(),
                            ptr::null_mut(),
                            status,
                        )
                    }
                })?
            }
            ModelFormat::FrozenGraph => {
                let bytes = std::fs::read(&config.path)?;
                import_graph_def(runtime, &graph, &bytes)?;
                runtime.call("TF_NewSession", |f, status| {
                    // SAFETY: graph and options are live.
                    unsafe { (f.TF_NewSession)(graph.as_ptr(), options.as_ptr(), status) }
                })?
            }
        };
        drop(options);

        let session = Session {
            ptr: NonNull::new(raw_session).ok_or(TfError::NullHandle("TF_Session"))?,
            runtime: Arc::clone(runtime),
        };

        let lookup = |op: &str, index: i32| find_output(runtime, &graph, op, index);
        let inputs = resolve_endpoints(&config.inputs, config.strict_resolution, lookup)?;
        let outputs = resolve_endpoints(&config.outputs, config.strict_resolution, lookup)?;

        log::info!(
            "Loaded model {} ({} input(s), {} output(s))",
            config.path.display(),
            inputs.len(),
            outputs.len()
        );

        Ok(Self {
            session,
            graph,
            inputs,
            outputs,
            config,
            runtime: Arc::clone(runtime),
        })
    }

    /// Names of every operation in the graph, in registration order
    pub fn operations(&self) -> Vec<String> {
        let f = self.runtime.functions();
        let mut names = Vec::new();
        let mut pos = 0usize;
        loop {
            // SAFETY: graph is live; pos is advanced by the runtime.
            let op = unsafe { (f.TF_GraphNextOperation)(self.graph.as_ptr(), &mut pos) };
            if op.is_null() {
                break;
            }
            names.push(operation_name(&self.runtime, op));
        }
        names
    }

    /// Static shape of a graph endpoint as recorded in the graph.
    ///
    /// Unknown dimensions are `-1`; `None` means the rank itself is unknown.
    pub fn operation_shape(&self, endpoint: &str) -> Result<Option<Vec<i64>>> {
        let (op, index) = parse_endpoint(endpoint);
        let output = find_output(&self.runtime, &self.graph, op, index)
            .ok_or_else(|| TfError::UnresolvedEndpoint(endpoint.to_string()))?;

        let graph = self.graph.as_ptr();
        let rank = self.runtime.call("TF_GraphGetTensorNumDims", |f, status| {
            // SAFETY: graph is live and output belongs to it.
            unsafe { (f.TF_GraphGetTensorNumDims)(graph, output, status) }
        })?;
        if rank < 0 {
            return Ok(None);
        }

        let mut dims = vec![0i64; rank as usize];
        self.runtime.call("TF_GraphGetTensorShape", |f, status| {
            // SAFETY: dims has room for rank entries.
            unsafe { (f.TF_GraphGetTensorShape)(graph, output, dims.as_mut_ptr(), rank, status) }
        })?;
        Ok(Some(dims))
    }

    /// Run a single-input, single-output model
    pub fn run(&self, input: &Tensor) -> Result<Tensor> {
        if self.inputs.len() != 1 {
            return Err(TfError::EndpointCount {
                kind: "input",
                expected: 1,
                actual: self.inputs.len(),
            });
        }
        if self.outputs.len() != 1 {
            return Err(TfError::EndpointCount {
                kind: "output",
                expected: 1,
                actual: self.outputs.len(),
            });
        }
        let mut outputs = self.run_many(std::slice::from_ref(input))?;
        outputs.pop().ok_or(TfError::NullHandle("output tensor"))
    }

    /// Run with one tensor per resolved input.
    ///
    /// Returns one tensor per resolved output. Any runtime failure aborts
    /// the whole call and nothing is returned.
    pub fn run_many(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        if inputs.len() != self.inputs.len() {
            return Err(TfError::EndpointCount {
                kind: "input",
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }
        let feeds: Vec<TF_Output> = self.inputs.iter().map(|e| e.output).collect();
        let fetches: Vec<TF_Output> = self.outputs.iter().map(|e| e.output).collect();
        let values: Vec<&Tensor> = inputs.iter().collect();
        self.run_endpoints(&feeds, &values, &fetches)
    }

    /// Run against endpoints named per call, independent of the configured
    /// ones. Names are always resolved strictly.
    pub fn run_named(&self, inputs: &[(&str, &Tensor)], outputs: &[&str]) -> Result<Vec<Tensor>> {
        let lookup = |name: &str| {
            let (op, index) = parse_endpoint(name);
            find_output(&self.runtime, &self.graph, op, index)
                .ok_or_else(|| TfError::UnresolvedEndpoint(name.to_string()))
        };
        let feeds = inputs
            .iter()
            .map(|(name, _)| lookup(*name))
            .collect::<Result<Vec<_>>>()?;
        let fetches = outputs
            .iter()
            .map(|name| lookup(*name))
            .collect::<Result<Vec<_>>>()?;
        let values: Vec<&Tensor> = inputs.iter().map(|(_, t)| *t).collect();
        self.run_endpoints(&feeds, &values, &fetches)
    }

    fn run_endpoints(
        &self,
        feeds: &[TF_Output],
        values: &[&Tensor],
        fetches: &[TF_Output],
    ) -> Result<Vec<Tensor>> {
        let resolved = values
            .iter()
            .map(|t| t.resolve())
            .collect::<Result<Vec<Owned<TF_Tensor>>>>()?;
        let input_ptrs: Vec<*mut TF_Tensor> = resolved.iter().map(|t| t.as_ptr()).collect();
        let session = self.session.ptr.as_ptr();

        log::debug!(
            "Running session with {} feed(s), {} fetch(es)",
            feeds.len(),
            fetches.len()
        );

        let produced = self.runtime.call("TF_SessionRun", |f, status| {
            let mut output_ptrs: Vec<*mut TF_Tensor> = vec![ptr::null_mut(); fetches.len()];
            // SAFETY: all arrays are live and sized to their counts; the
            // runtime fills output_ptrs with tensors owned by the caller.
            unsafe {
                (f.TF_SessionRun)(
                    session,
                    ptr::null(),
                    feeds.as_ptr(),
                    input_ptrs.as_ptr(),
                    feeds.len() as c_int,
                    fetches.as_ptr(),
                    output_ptrs.as_mut_ptr(),
                    fetches.len() as c_int,
                    ptr::null(),
                    0,
                    ptr::null_mut(),
                    status,
                );
            }
            // Take ownership before the status is checked so nothing leaks
            // on failure.
            output_ptrs
                .into_iter()
                // SAFETY: each non-null output is a fresh tensor.
                .map(|p| unsafe { Owned::from_raw(p, f.TF_DeleteTensor, "TF_Tensor") })
                .collect::<Vec<_>>()
        })?;

        produced
            .into_iter()
            .map(|buffer| {
                let buffer = buffer.ok_or(TfError::NullHandle("output tensor"))?;
                Tensor::from_buffer(&self.runtime, buffer)
            })
            .collect()
    }

    /// Names of the resolved input endpoints
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|e| e.name.as_str()).collect()
    }

    /// Names of the resolved output endpoints
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        log::info!("Freed model: {}", self.config.path.display());
    }
}

// SAFETY: Model is Send because the graph and session are only touched
// through the runtime, whose status object is locked per call. TF_Output
// values are plain pointers into the graph owned by the same Model.
unsafe impl Send for Model {}

/// Split `op:index` into its parts; a missing or non-numeric suffix means
/// output 0 of the whole name
fn parse_endpoint(name: &str) -> (&str, i32) {
    match name.rsplit_once(':') {
        Some((op, index)) => match index.parse::<i32>() {
            Ok(index) if index >= 0 => (op, index),
            _ => (name, 0),
        },
        None => (name, 0),
    }
}

/// Resolve endpoint names in order.
///
/// With `strict`, an unresolved name is an error. Without it, resolution
/// stops at the first unresolved name and it and every later name are
/// dropped.
fn resolve_endpoints<F>(names: &[String], strict: bool, mut lookup: F) -> Result<Vec<Endpoint>>
where
    F: FnMut(&str, i32) -> Option<TF_Output>,
{
    let mut resolved = Vec::with_capacity(names.len());
    for (position, name) in names.iter().enumerate() {
        let (op, index) = parse_endpoint(name);
        match lookup(op, index) {
            Some(output) => resolved.push(Endpoint {
                name: name.clone(),
                output,
            }),
            None if strict => return Err(TfError::UnresolvedEndpoint(name.clone())),
            None => {
                log::warn!(
                    "Endpoint '{}' not found; dropping it and {} later endpoint(s)",
                    name,
                    names.len() - position - 1
                );
                break;
            }
        }
    }
    Ok(resolved)
}

fn find_output(
    runtime: &Runtime,
    graph: &Owned<TF_Graph>,
    op: &str,
    index: i32,
) -> Option<TF_Output> {
    let name = CString::new(op).ok()?;
    let f = runtime.functions();
    // SAFETY: graph is live and name is NUL-terminated.
    let oper = unsafe { (f.TF_GraphOperationByName)(graph.as_ptr(), name.as_ptr()) };
    if oper.is_null() {
        return None;
    }
    // SAFETY: oper is an operation of the live graph.
    let count = unsafe { (f.TF_OperationNumOutputs)(oper) };
    if index >= count {
        return None;
    }
    Some(TF_Output { oper, index })
}

fn operation_name(runtime: &Runtime, op: *mut TF_Operation) -> String {
    // SAFETY: op belongs to a live graph; the name is owned by the graph.
    unsafe {
        let raw = (runtime.functions().TF_OperationName)(op);
        if raw.is_null() {
            return String::new();
        }
        CStr::from_ptr(raw).to_string_lossy().into_owned()
    }
}

fn import_graph_def(runtime: &Runtime, graph: &Owned<TF_Graph>, bytes: &[u8]) -> Result<()> {
    let f = runtime.functions();
    // SAFETY: bytes is valid for its length; the runtime copies it.
    let buffer = unsafe {
        Owned::from_raw(
            (f.TF_NewBufferFromString)(bytes.as_ptr() as *const c_void, bytes.len()),
            f.TF_DeleteBuffer,
            "TF_Buffer",
        )
    }
    .ok_or(TfError::NullHandle("TF_Buffer"))?;
    // SAFETY: no preconditions.
    let options = unsafe {
        Owned::from_raw(
            (f.TF_NewImportGraphDefOptions)(),
            f.TF_DeleteImportGraphDefOptions,
            "TF_ImportGraphDefOptions",
        )
    }
    .ok_or(TfError::NullHandle("TF_ImportGraphDefOptions"))?;

    runtime.call("TF_GraphImportGraphDef", |f, status| {
        // SAFETY: graph, buffer and options are live.
        unsafe {
            (f.TF_GraphImportGraphDef)(graph.as_ptr(), buffer.as_ptr(), options.as_ptr(), status)
        }
    })
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.to_string_lossy().as_bytes()).map_err(|e| TfError::InvalidPath(e.to_string()))
}
