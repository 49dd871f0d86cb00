use thiserror::Error;

use crate::recognition::RecognitionState;

/// All errors produced by triage-core.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("tf-idf config mismatch: {vocabulary} vocabulary tokens but {idf} idf weights")]
    ConfigMismatch { vocabulary: usize, idf: usize },

    #[error("invalid label table: {0}")]
    InvalidLabelTable(String),

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("failed to load recognition model: {0}")]
    ModelLoadFailure(String),

    #[error("failed to start recognition session: {0}")]
    SessionStartFailure(String),

    #[error("cannot {operation} while recognition session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: RecognitionState,
    },

    #[error("recognition engine error: {0}")]
    Recognition(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config document: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TriageError>;
