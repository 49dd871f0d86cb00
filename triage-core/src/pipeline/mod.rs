//! `ClassificationPipeline`: transcript text in, routed categories out.
//!
//! ## Stages (per call)
//!
//! ```text
//! 1. Blank text            → ["unknown"], nothing loaded
//! 2. Acquire guard         → busy? drop the call (None)
//! 3. InferenceEngine::ensure_loaded
//! 4. vectorize             → all zero? ["unknown"], no inference
//! 5. infer + decode_labels → labels, or ["unknown"] when none selected
//! ```
//!
//! Failures in stages 3–5, including a panicking backend, are logged and
//! degrade to `["unknown"]`: losing a classification is acceptable, blocking
//! report submission is not.

pub mod guard;
pub mod result;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, TriageError},
    inference::{decode_labels, InferenceEngine},
    vectorize::vectorize,
    vocab::{ClassifierAssets, LabelTable, VocabularyModel},
};

use self::guard::ClassificationGuard;
pub use self::result::{ClassificationResult, EmergencyService};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub classify_calls: AtomicUsize,
    pub dropped_busy: AtomicUsize,
    pub empty_inputs: AtomicUsize,
    pub zero_vectors: AtomicUsize,
    pub inference_calls: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub unknown_results: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            classify_calls: self.classify_calls.load(Ordering::Relaxed),
            dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            empty_inputs: self.empty_inputs.load(Ordering::Relaxed),
            zero_vectors: self.zero_vectors.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            unknown_results: self.unknown_results.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub classify_calls: usize,
    pub dropped_busy: usize,
    pub empty_inputs: usize,
    pub zero_vectors: usize,
    pub inference_calls: usize,
    pub inference_errors: usize,
    pub unknown_results: usize,
}

/// The unit every transcript event driver calls.
///
/// `Send + Sync`; share it as `Arc<ClassificationPipeline>`.
pub struct ClassificationPipeline {
    vocabulary: VocabularyModel,
    labels: LabelTable,
    engine: Arc<InferenceEngine>,
    guard: ClassificationGuard,
    diagnostics: PipelineDiagnostics,
}

impl ClassificationPipeline {
    pub fn new(vocabulary: VocabularyModel, labels: LabelTable, engine: Arc<InferenceEngine>) -> Self {
        Self {
            vocabulary,
            labels,
            engine,
            guard: ClassificationGuard::new(),
            diagnostics: PipelineDiagnostics::default(),
        }
    }

    pub fn from_assets(assets: ClassifierAssets, engine: Arc<InferenceEngine>) -> Self {
        Self::new(assets.vocabulary, assets.labels, engine)
    }

    /// Classify one final transcript.
    ///
    /// Returns `None` only when the call was dropped because another
    /// classification is in flight. Every call that runs yields a result.
    pub fn classify(&self, text: &str) -> Option<ClassificationResult> {
        self.diagnostics.classify_calls.fetch_add(1, Ordering::Relaxed);

        if text.trim().is_empty() {
            self.diagnostics.empty_inputs.fetch_add(1, Ordering::Relaxed);
            return Some(self.unknown());
        }

        let Some(_permit) = self.guard.try_acquire() else {
            self.diagnostics.dropped_busy.fetch_add(1, Ordering::Relaxed);
            warn!("classification already in flight; dropping transcript");
            return None;
        };

        debug!(chars = text.len(), "classifying transcript");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(text)))
            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())));
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.diagnostics.inference_errors.fetch_add(1, Ordering::Relaxed);
                error!("classification failed: {e}");
                ClassificationResult::unknown()
            }
        };

        if result.is_unknown() {
            self.diagnostics.unknown_results.fetch_add(1, Ordering::Relaxed);
        }
        info!(labels = ?result.labels(), "transcript classified");
        Some(result)
    }

    fn run(&self, text: &str) -> Result<ClassificationResult> {
        let session = self.engine.ensure_loaded()?;

        let vector = vectorize(text, &self.vocabulary);
        if vector.is_zero() {
            self.diagnostics.zero_vectors.fetch_add(1, Ordering::Relaxed);
            warn!("no vocabulary tokens in transcript; returning unknown");
            return Ok(ClassificationResult::unknown());
        }

        self.diagnostics.inference_calls.fetch_add(1, Ordering::Relaxed);
        let outputs = self.engine.infer(&session, &vector)?;
        let labels = decode_labels(&outputs, &self.labels)?;
        Ok(ClassificationResult::from_labels(labels))
    }

    fn unknown(&self) -> ClassificationResult {
        self.diagnostics.unknown_results.fetch_add(1, Ordering::Relaxed);
        ClassificationResult::unknown()
    }

    /// Whether a classification currently holds the guard.
    pub fn is_busy(&self) -> bool {
        self.guard.is_held()
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn vocabulary(&self) -> &VocabularyModel {
        &self.vocabulary
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

fn panic_error(payload: &(dyn std::any::Any + Send)) -> TriageError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    TriageError::Inference(format!("classifier backend panicked: {message}"))
}
