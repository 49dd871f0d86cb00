//! `ScriptedEngine`: recognition backend that replays queued utterances.
//!
//! Used by the host binary (transcripts arrive as text) and by tests. For
//! every queued utterance `start` emits a partial carrying the first half of
//! its words followed by the final text. With nothing queued it reports a
//! timeout, as a live engine would after `timeout_ms` of silence.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TriageError};
use crate::recognition::{EventSink, RecognitionEngine, StartOptions};

/// Producer half: queue utterances for the next `start`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFeed {
    queue: Arc<Mutex<VecDeque<String>>>,
}

impl ScriptedFeed {
    pub fn push(&self, utterance: impl Into<String>) {
        self.queue.lock().push_back(utterance.into());
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ScriptedEngine {
    feed: ScriptedFeed,
    known_models: Option<Vec<String>>,
    loaded: Option<String>,
    listening: bool,
}

impl ScriptedEngine {
    /// Engine accepting any non-empty model identifier.
    pub fn new() -> (Self, ScriptedFeed) {
        let engine = Self::default();
        let feed = engine.feed.clone();
        (engine, feed)
    }

    /// Restrict `load_model` to the given identifiers.
    pub fn with_known_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_models = Some(models.into_iter().map(Into::into).collect());
        self
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn load_model(&mut self, model_id: &str) -> Result<()> {
        if model_id.trim().is_empty() {
            return Err(TriageError::Recognition("empty model identifier".into()));
        }
        if let Some(known) = &self.known_models {
            if !known.iter().any(|m| m == model_id) {
                return Err(TriageError::Recognition(format!(
                    "unknown model {model_id}"
                )));
            }
        }
        if self.loaded.is_some() {
            return Err(TriageError::Recognition("a model is already loaded".into()));
        }
        self.loaded = Some(model_id.to_owned());
        Ok(())
    }

    fn start(&mut self, options: &StartOptions, events: EventSink) -> Result<bool> {
        if self.loaded.is_none() || self.listening {
            return Ok(false);
        }
        self.listening = true;

        let utterances: Vec<String> = self.feed.queue.lock().drain(..).collect();
        debug!(
            utterances = utterances.len(),
            timeout_ms = options.timeout_ms,
            "scripted engine replaying"
        );
        if utterances.is_empty() {
            events.timeout();
        }
        for utterance in utterances {
            let words: Vec<&str> = utterance.split_whitespace().collect();
            if !words.is_empty() {
                events.partial(words[..words.len().div_ceil(2)].join(" "));
            }
            events.final_result(utterance);
        }
        Ok(true)
    }

    fn stop(&mut self) -> Result<()> {
        self.listening = false;
        Ok(())
    }

    fn unload(&mut self) {
        self.listening = false;
        self.loaded = None;
    }
}
