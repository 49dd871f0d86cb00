//! Classifier model abstraction.
//!
//! Two traits decouple the pipeline from the inference runtime:
//! - `SessionLoader` creates a session from the serialized graph (expensive).
//! - `ClassifierSession` executes one `[1, N]` call against a loaded graph.
//!
//! `InferenceEngine` owns at most one session at a time. It is created lazily
//! by `ensure_loaded`, reused by every later call, and dropped by `unload`.
//! `&mut self` on `run` expresses that runtimes keep per-session scratch
//! state; all calls are serialised through `SessionHandle`'s mutex.

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxSessionConfig, OnnxSessionLoader};

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TriageError};
use crate::vectorize::FeatureVector;
use crate::vocab::LabelTable;

/// Raw contents of one model output tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValues {
    I64(Vec<i64>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    /// Not a plain numeric tensor (e.g. a ZipMap sequence); carries the
    /// runtime's description of the value.
    NonNumeric(String),
}

impl OutputValues {
    /// Positions whose value is the indicator `1`, in any numeric encoding.
    pub fn selected_positions(&self) -> Vec<usize> {
        fn ones<T, F: Fn(&T) -> bool>(values: &[T], is_one: F) -> Vec<usize> {
            values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| is_one(v).then_some(i))
                .collect()
        }
        match self {
            Self::I64(v) => ones(v, |x| *x == 1),
            Self::I32(v) => ones(v, |x| *x == 1),
            Self::F32(v) => ones(v, |x| *x == 1.0),
            Self::F64(v) => ones(v, |x| *x == 1.0),
            Self::NonNumeric(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::I64(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::NonNumeric(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named output of one inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedOutput {
    pub name: String,
    pub values: OutputValues,
}

impl NamedOutput {
    pub fn new(name: impl Into<String>, values: OutputValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// One loaded model graph.
pub trait ClassifierSession: Send + 'static {
    /// Run the graph on a single `[1, N]` feature row.
    ///
    /// # Errors
    /// Returns an error if tensor construction or execution fails.
    fn run(&mut self, features: &[f32]) -> Result<Vec<NamedOutput>>;

    fn input_names(&self) -> Vec<String>;

    fn output_names(&self) -> Vec<String>;
}

/// Factory for sessions; called once per load.
pub trait SessionLoader: Send + Sync + 'static {
    fn load(&self) -> Result<Box<dyn ClassifierSession>>;
}

/// Shared handle to the live session.
///
/// Uses `parking_lot::Mutex` so a panicking backend cannot poison it.
#[derive(Clone)]
pub struct SessionHandle(pub Arc<Mutex<Box<dyn ClassifierSession>>>);

impl SessionHandle {
    pub fn new(session: Box<dyn ClassifierSession>) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Whether two handles refer to the same loaded session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

/// Owner of the process-wide classifier session.
pub struct InferenceEngine {
    loader: Box<dyn SessionLoader>,
    session: Mutex<Option<SessionHandle>>,
    loads: AtomicUsize,
}

impl InferenceEngine {
    pub fn new<L: SessionLoader>(loader: L) -> Self {
        Self {
            loader: Box::new(loader),
            session: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the live session, loading it first if there is none.
    ///
    /// The lock is held across the load so concurrent callers never load twice.
    pub fn ensure_loaded(&self) -> Result<SessionHandle> {
        let mut slot = self.session.lock();
        if let Some(handle) = slot.as_ref() {
            debug!("reusing existing classifier session");
            return Ok(handle.clone());
        }

        info!("loading classifier session");
        let session = self.loader.load()?;
        info!(
            inputs = ?session.input_names(),
            outputs = ?session.output_names(),
            "classifier session ready"
        );
        let handle = SessionHandle::new(session);
        *slot = Some(handle.clone());
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Execute one inference call.
    pub fn infer(&self, session: &SessionHandle, vector: &FeatureVector) -> Result<Vec<NamedOutput>> {
        let features = vector.to_f32();
        session.0.lock().run(&features)
    }

    /// Drop the live session; the next `ensure_loaded` loads a fresh one.
    pub fn unload(&self) {
        if self.session.lock().take().is_some() {
            info!("classifier session unloaded");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Number of sessions created so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("loaded", &self.is_loaded())
            .field("loads", &self.load_count())
            .finish_non_exhaustive()
    }
}

/// Pick the output carrying class indicators: the first whose name contains
/// "label", else the first output.
pub fn label_output(outputs: &[NamedOutput]) -> Option<&NamedOutput> {
    outputs
        .iter()
        .find(|o| o.name.to_ascii_lowercase().contains("label"))
        .or_else(|| outputs.first())
}

/// Decode raw outputs into category names. Empty when nothing was selected.
pub fn decode_labels(outputs: &[NamedOutput], labels: &LabelTable) -> Result<Vec<String>> {
    let output = label_output(outputs)
        .ok_or_else(|| TriageError::Inference("model produced no outputs".into()))?;
    if let OutputValues::NonNumeric(kind) = &output.values {
        return Err(TriageError::Inference(format!(
            "label output {} is not a numeric tensor ({kind})",
            output.name
        )));
    }
    let selected = output.values.selected_positions();
    debug!(
        output = %output.name,
        width = output.values.len(),
        selected = ?selected,
        "decoded label output"
    );
    Ok(selected.into_iter().map(|i| labels.name_for(i)).collect())
}
