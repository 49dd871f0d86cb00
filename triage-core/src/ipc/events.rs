//! Event types exchanged with the recognition engine and the report workflow.
//!
//! | Event | Producer | Consumer |
//! |-------|----------|----------|
//! | `RecognitionEvent` | recognition engine | `listener::drive` |
//! | `SessionStateEvent` | `RecognitionSessionManager` | host / UI |
//! | `ClassifiedReport` | `ClassifyingListener` | report submission |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::ClassificationResult;
use crate::recognition::RecognitionState;

// ---------------------------------------------------------------------------
// Recognition events
// ---------------------------------------------------------------------------

/// Notification from the speech engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecognitionEvent {
    /// Text so far; the session is still listening.
    Partial { text: String },
    /// Terminal text for this utterance. The only classification trigger.
    Final { text: String },
    /// Engine-reported failure.
    Error { message: String },
    /// The engine's recognition timeout elapsed.
    Timeout,
}

impl RecognitionEvent {
    pub fn transcript(&self) -> Option<TranscriptEvent<'_>> {
        match self {
            Self::Partial { text } => Some(TranscriptEvent::Partial(text)),
            Self::Final { text } => Some(TranscriptEvent::Final(text)),
            Self::Error { .. } | Self::Timeout => None,
        }
    }
}

/// Borrowed view of a transcript-carrying event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptEvent<'a> {
    Partial(&'a str),
    Final(&'a str),
}

// ---------------------------------------------------------------------------
// Session state events
// ---------------------------------------------------------------------------

/// Emitted when the recognition session changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateEvent {
    pub state: RecognitionState,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Classified reports
// ---------------------------------------------------------------------------

/// Payload handed to the report-submission workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedReport {
    pub transcript: String,
    pub classification: ClassificationResult,
    pub classified_at: DateTime<Utc>,
}

impl ClassifiedReport {
    pub fn new(transcript: impl Into<String>, classification: ClassificationResult) -> Self {
        Self {
            transcript: transcript.into(),
            classification,
            classified_at: Utc::now(),
        }
    }
}
