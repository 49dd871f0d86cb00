//! # triage-core
//!
//! Spoken emergency classification pipeline: decides which services (fire,
//! police, medical) a spoken report should be routed to.
//!
//! ## Architecture
//!
//! ```text
//! RecognitionEngine ──events──► RecognitionSessionManager ──broadcast──► listener::drive
//!                                                                           │ Final
//!                                                              ClassificationPipeline::classify
//!                                                                           │
//!                                         vectorize (tf-idf) → InferenceEngine → LabelTable
//!                                                                           │
//!                                                             ReportSink::submit(ClassifiedReport)
//! ```
//!
//! Lifecycle errors (model load, start) propagate to the caller. Inference
//! errors never do: a failed classification degrades to `["unknown"]`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod inference;
pub mod ipc;
pub mod listener;
pub mod pipeline;
pub mod recognition;
pub mod vectorize;
pub mod vocab;

// Convenience re-exports for downstream crates
pub use error::{Result, TriageError};
pub use inference::{ClassifierSession, InferenceEngine, SessionHandle, SessionLoader};
pub use ipc::events::{ClassifiedReport, RecognitionEvent, SessionStateEvent, TranscriptEvent};
pub use listener::{BusyPolicy, ClassifyingListener, ReportSink, TranscriptListener};
pub use pipeline::{ClassificationPipeline, ClassificationResult, EmergencyService};
pub use recognition::{
    MicrophonePermission, RecognitionConfig, RecognitionEngine, RecognitionSessionManager,
    RecognitionState,
};
pub use vectorize::{vectorize, FeatureVector};
pub use vocab::{AssetPaths, ClassifierAssets, LabelTable, VocabularyModel};

#[cfg(feature = "onnx")]
pub use inference::{OnnxSessionConfig, OnnxSessionLoader};
