//! Multi-label classifier backend via the `ort` crate.
//!
//! Targets a scikit-learn style export of the tf-idf classifier:
//!
//! | Name | Shape | DType | Direction |
//! |------|-------|-------|-----------|
//! | first input (e.g. `float_input`) | `[1, N]` | f32 | in |
//! | `*label*` | `[1, M]` | i64 (or i32/f32/f64) | out |
//! | others (probabilities) | any | any | out, ignored |
//!
//! Every graph output is returned in graph order. Outputs that are not plain
//! numeric tensors (e.g. ZipMap sequences) come back as
//! `OutputValues::NonNumeric`; only the label output is decoded downstream.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::{DynValue, Value};
use tracing::{debug, info};

use crate::error::{Result, TriageError};
use crate::inference::{ClassifierSession, NamedOutput, OutputValues, SessionLoader};

#[derive(Debug, Clone)]
pub struct OnnxSessionConfig {
    pub model_path: PathBuf,
    /// Intra-op thread count. `None` reads `TRIAGE_ORT_INTRA_THREADS`, then
    /// falls back to 1 (the graph is a single linear layer).
    pub intra_threads: Option<usize>,
}

impl OnnxSessionConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            intra_threads: None,
        }
    }
}

fn intra_threads(config: &OnnxSessionConfig) -> usize {
    config
        .intra_threads
        .or_else(|| {
            std::env::var("TRIAGE_ORT_INTRA_THREADS")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
        })
        .unwrap_or(1)
        .clamp(1, 16)
}

fn create_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    if !model_path.exists() {
        return Err(TriageError::ModelNotFound {
            path: model_path.to_path_buf(),
        });
    }

    let session = SessionBuilder::new()
        .map_err(|e| TriageError::OnnxSession(e.to_string()))?
        .with_intra_threads(intra_threads)
        .map_err(|e| TriageError::OnnxSession(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| TriageError::OnnxSession(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| TriageError::OnnxSession(e.to_string()))?;
    info!(intra_threads, model = ?model_path, "ONNX classifier session created");
    Ok(session)
}

/// Loads `OnnxClassifier` sessions from a model file.
#[derive(Debug, Clone)]
pub struct OnnxSessionLoader {
    config: OnnxSessionConfig,
}

impl OnnxSessionLoader {
    pub fn new(config: OnnxSessionConfig) -> Self {
        Self { config }
    }
}

impl SessionLoader for OnnxSessionLoader {
    fn load(&self) -> Result<Box<dyn ClassifierSession>> {
        let session = create_session(&self.config.model_path, intra_threads(&self.config))?;
        Ok(Box::new(OnnxClassifier::from_session(session)?))
    }
}

/// A loaded classifier graph.
pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
}

impl OnnxClassifier {
    fn from_session(session: Session) -> Result<Self> {
        let input_name = session
            .inputs()
            .first()
            .map(|outlet| outlet.name().to_string())
            .ok_or_else(|| TriageError::OnnxSession("classifier model has no inputs".into()))?;
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        if output_names.is_empty() {
            return Err(TriageError::OnnxSession(
                "classifier model has no outputs".into(),
            ));
        }

        Ok(Self {
            session,
            input_name,
            output_names,
        })
    }
}

impl ClassifierSession for OnnxClassifier {
    fn run(&mut self, features: &[f32]) -> Result<Vec<NamedOutput>> {
        let row = Array2::<f32>::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| TriageError::Inference(e.to_string()))?;
        let input_val = Value::from_array(row)
            .map_err(|e: ort::Error| TriageError::OnnxSession(e.to_string()))?;
        let inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| TriageError::Inference(e.to_string()))?;

        let mut named = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let Some(value) = outputs.get(name.as_str()) else {
                continue;
            };
            let values = extract_values(value).unwrap_or_else(|| {
                debug!(output = %name, "model output is not a numeric tensor");
                OutputValues::NonNumeric(format!("{:?}", value.dtype()))
            });
            named.push(NamedOutput::new(name.clone(), values));
        }
        Ok(named)
    }

    fn input_names(&self) -> Vec<String> {
        vec![self.input_name.clone()]
    }

    fn output_names(&self) -> Vec<String> {
        self.output_names.clone()
    }
}

fn extract_values(value: &DynValue) -> Option<OutputValues> {
    if let Ok((_, data)) = value.try_extract_tensor::<i64>() {
        return Some(OutputValues::I64(data.to_vec()));
    }
    if let Ok((_, data)) = value.try_extract_tensor::<i32>() {
        return Some(OutputValues::I32(data.to_vec()));
    }
    if let Ok((_, data)) = value.try_extract_tensor::<f32>() {
        return Some(OutputValues::F32(data.to_vec()));
    }
    if let Ok((_, data)) = value.try_extract_tensor::<f64>() {
        return Some(OutputValues::F64(data.to_vec()));
    }
    None
}
