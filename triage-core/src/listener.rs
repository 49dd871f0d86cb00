//! Dispatch of recognition events to a `TranscriptListener`.
//!
//! `drive` consumes the manager's broadcast channel. Final transcripts are
//! handled on `spawn_blocking` without awaiting, so a second final arriving
//! while the first is still classifying reaches the pipeline concurrently
//! and meets the classification guard.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::ipc::events::{ClassifiedReport, RecognitionEvent, TranscriptEvent};
use crate::pipeline::ClassificationPipeline;

/// Receiver of recognition events. All methods default to no-ops.
pub trait TranscriptListener: Send + Sync + 'static {
    fn on_partial(&self, _text: &str) {}

    fn on_final(&self, _text: &str) {}

    fn on_error(&self, _message: &str) {}

    fn on_timeout(&self) {}
}

/// Route one event to the matching listener method.
pub fn dispatch<L: TranscriptListener + ?Sized>(listener: &L, event: &RecognitionEvent) {
    match event {
        RecognitionEvent::Partial { text } => listener.on_partial(text),
        RecognitionEvent::Final { text } => listener.on_final(text),
        RecognitionEvent::Error { message } => listener.on_error(message),
        RecognitionEvent::Timeout => listener.on_timeout(),
    }
}

/// Forward events from `rx` to `listener` until the channel closes.
pub async fn drive<L: TranscriptListener>(
    mut rx: broadcast::Receiver<RecognitionEvent>,
    listener: Arc<L>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.transcript() {
                Some(TranscriptEvent::Final(text)) => {
                    let text = text.to_owned();
                    let listener = Arc::clone(&listener);
                    tokio::task::spawn_blocking(move || listener.on_final(&text));
                }
                _ => dispatch(listener.as_ref(), &event),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event listener lagged; events lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("recognition event channel closed");
}

/// Downstream consumer of classified reports (the report-submission workflow).
pub trait ReportSink: Send + Sync + 'static {
    fn submit(&self, report: ClassifiedReport);
}

impl ReportSink for mpsc::UnboundedSender<ClassifiedReport> {
    fn submit(&self, report: ClassifiedReport) {
        if self.send(report).is_err() {
            warn!("report receiver dropped; classified report discarded");
        }
    }
}

/// What to do with a final transcript that arrives while another is being
/// classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BusyPolicy {
    /// Discard it.
    #[default]
    Drop,
    /// Keep only the latest such transcript and classify it once the
    /// in-flight call finishes.
    QueueLatest,
}

/// Listener that classifies final transcripts and submits the results.
pub struct ClassifyingListener<S: ReportSink> {
    pipeline: Arc<ClassificationPipeline>,
    sink: S,
    policy: BusyPolicy,
    latest_partial: Mutex<Option<String>>,
    pending: Mutex<Option<String>>,
}

impl<S: ReportSink> ClassifyingListener<S> {
    pub fn new(pipeline: Arc<ClassificationPipeline>, sink: S, policy: BusyPolicy) -> Self {
        Self {
            pipeline,
            sink,
            policy,
            latest_partial: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    /// Most recent partial transcript.
    pub fn latest_partial(&self) -> Option<String> {
        self.latest_partial.lock().clone()
    }

    fn classify_and_submit(&self, text: String) {
        let mut next = Some(text);
        while let Some(text) = next.take() {
            match self.pipeline.classify(&text) {
                Some(classification) => {
                    self.sink.submit(ClassifiedReport::new(text, classification));
                    if self.policy == BusyPolicy::QueueLatest {
                        next = self.pending.lock().take();
                    }
                }
                None if self.policy == BusyPolicy::QueueLatest => {
                    if self.pending.lock().replace(text).is_some() {
                        debug!("replaced older pending transcript");
                    }
                    // The in-flight call may have finished before the slot was
                    // filled; pick it up here so it is never stranded.
                    if !self.pipeline.is_busy() {
                        next = self.pending.lock().take();
                    }
                }
                None => {
                    warn!(chars = text.len(), "final transcript dropped: classifier busy");
                }
            }
        }
    }
}

impl<S: ReportSink> TranscriptListener for ClassifyingListener<S> {
    fn on_partial(&self, text: &str) {
        debug!(text, "partial transcript");
        *self.latest_partial.lock() = Some(text.to_owned());
    }

    fn on_final(&self, text: &str) {
        info!(chars = text.len(), "final transcript received");
        self.classify_and_submit(text.to_owned());
    }

    fn on_error(&self, message: &str) {
        warn!(message, "recognition engine error");
    }

    fn on_timeout(&self) {
        info!("recognition timed out");
    }
}
