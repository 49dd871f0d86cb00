//! `RecognitionSessionManager`: lifecycle controller for the speech engine.
//!
//! ## Lifecycle
//!
//! ```text
//! Unloaded ──load_model()──► ModelLoaded ──start()──► Listening
//!    ▲                          │    ▲                    │
//!    └────────unload()──────────┘    └───────stop()───────┘
//! ```
//!
//! `start()` while `Listening` first runs a full stop → unload → reload
//! cycle. A failed start falls back to `Unloaded`. `unload()` is refused
//! while listening so `stop()` always completes first, and every unload also
//! drops the classifier session so no handle outlives its recognition session.
//!
//! ## Settling
//!
//! Native engines need time to release the microphone and model between
//! transitions. Instead of fixed sleeps, the manager polls
//! `RecognitionEngine::is_ready` with exponential backoff.

pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, TriageError},
    inference::InferenceEngine,
    ipc::events::{RecognitionEvent, SessionStateEvent},
};

pub use self::scripted::{ScriptedEngine, ScriptedFeed};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// State of the recognition session. Only the manager mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecognitionState {
    Unloaded,
    ModelLoaded,
    Listening,
}

/// Options passed to the engine on `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Recognition timeout owned by the engine.
    pub timeout_ms: u64,
}

/// Handle the engine uses to deliver events to the manager's subscribers.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<RecognitionEvent>,
}

impl EventSink {
    pub fn emit(&self, event: RecognitionEvent) {
        // No subscribers is not an error; events are fire-and-forget.
        let _ = self.tx.send(event);
    }

    pub fn partial(&self, text: impl Into<String>) {
        self.emit(RecognitionEvent::Partial { text: text.into() });
    }

    pub fn final_result(&self, text: impl Into<String>) {
        self.emit(RecognitionEvent::Final { text: text.into() });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(RecognitionEvent::Error {
            message: message.into(),
        });
    }

    pub fn timeout(&self) {
        self.emit(RecognitionEvent::Timeout);
    }
}

/// Contract for external speech recognition engines.
pub trait RecognitionEngine: Send + 'static {
    /// Load the named acoustic model.
    ///
    /// # Errors
    /// Returns an error if the engine rejects the identifier.
    fn load_model(&mut self, model_id: &str) -> Result<()>;

    /// Begin listening. Events are delivered through `events` until `stop`.
    /// `Ok(false)` means the engine declined to start.
    fn start(&mut self, options: &StartOptions, events: EventSink) -> Result<bool>;

    fn stop(&mut self) -> Result<()>;

    /// Release the model and native resources.
    fn unload(&mut self);

    /// Whether the engine has settled after the last transition.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Source of truth for microphone access. The manager only reads it.
pub trait MicrophonePermission: Send + Sync + 'static {
    fn is_granted(&self) -> bool;
}

/// Permission fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl MicrophonePermission for StaticPermission {
    fn is_granted(&self) -> bool {
        self.0
    }
}

/// Exponential backoff used while waiting for the engine to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ReadinessBackoff {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub attempts: u32,
}

impl Default for ReadinessBackoff {
    fn default() -> Self {
        Self {
            initial_ms: 50,
            max_ms: 1_000,
            attempts: 8,
        }
    }
}

impl ReadinessBackoff {
    /// Delay before poll `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_ms.saturating_mul(factor).min(self.max_ms))
    }
}

/// Poll `engine.is_ready()` until it holds or the attempts run out.
pub fn wait_until_ready(engine: &dyn RecognitionEngine, backoff: &ReadinessBackoff) -> bool {
    if engine.is_ready() {
        return true;
    }
    for attempt in 0..backoff.attempts {
        let delay = backoff.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting for recognition engine");
        std::thread::sleep(delay);
        if engine.is_ready() {
            return true;
        }
    }
    false
}

/// Configuration for `RecognitionSessionManager`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct RecognitionConfig {
    /// Acoustic model identifier passed to `load_model`.
    pub model_id: String,
    /// Recognition timeout passed to `start`. Default: 30 000 ms.
    pub timeout_ms: u64,
    pub readiness: ReadinessBackoff,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            model_id: "vosk-model-small-en-us-0.15".into(),
            timeout_ms: 30_000,
            readiness: ReadinessBackoff::default(),
        }
    }
}

struct Lifecycle {
    engine: Box<dyn RecognitionEngine>,
    state: RecognitionState,
    model_id: Option<String>,
}

/// Owner of the recognition engine and its paired classifier session.
///
/// `Send + Sync`; every operation takes the lifecycle lock for its whole
/// duration, so transitions never interleave.
pub struct RecognitionSessionManager {
    config: RecognitionConfig,
    lifecycle: Mutex<Lifecycle>,
    permission: Arc<dyn MicrophonePermission>,
    inference: Arc<InferenceEngine>,
    event_tx: broadcast::Sender<RecognitionEvent>,
    state_tx: broadcast::Sender<SessionStateEvent>,
}

impl RecognitionSessionManager {
    pub fn new<E: RecognitionEngine>(
        config: RecognitionConfig,
        engine: E,
        permission: Arc<dyn MicrophonePermission>,
        inference: Arc<InferenceEngine>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (state_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            lifecycle: Mutex::new(Lifecycle {
                engine: Box::new(engine),
                state: RecognitionState::Unloaded,
                model_id: None,
            }),
            permission,
            inference,
            event_tx,
            state_tx,
        }
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// Load the acoustic model. Valid only from `Unloaded`.
    ///
    /// # Errors
    /// - `TriageError::InvalidState` if a model is already loaded.
    /// - `TriageError::ModelLoadFailure` if the engine rejects the model or
    ///   never settles.
    pub fn load_model(&self, model_id: &str) -> Result<()> {
        let mut lc = self.lifecycle.lock();
        if lc.state != RecognitionState::Unloaded {
            return Err(TriageError::InvalidState {
                operation: "load model",
                state: lc.state,
            });
        }
        self.load_locked(&mut lc, model_id)
    }

    /// Start listening. Valid from `ModelLoaded`; from `Listening` the session
    /// is cycled (stop → unload → reload) first.
    ///
    /// # Errors
    /// - `TriageError::PermissionDenied` if microphone access is not granted.
    /// - `TriageError::InvalidState` if no model is loaded.
    /// - `TriageError::ModelLoadFailure` if the reload of a cycle fails.
    /// - `TriageError::SessionStartFailure` if the engine fails to start; the
    ///   session is then unloaded.
    pub fn start(&self, timeout_ms: u64) -> Result<()> {
        if !self.permission.is_granted() {
            warn!("microphone permission not granted");
            return Err(TriageError::PermissionDenied);
        }

        let mut lc = self.lifecycle.lock();
        if lc.state == RecognitionState::Listening {
            info!("session already listening; cycling stop → unload → reload");
            let model_id = lc
                .model_id
                .clone()
                .unwrap_or_else(|| self.config.model_id.clone());
            if let Err(e) = self.stop_locked(&mut lc) {
                let failure = format!("restart cycle could not stop the session: {e}");
                warn!(reason = %failure, "unloading recognition session");
                self.unload_locked(&mut lc, Some(failure.clone()));
                return Err(TriageError::SessionStartFailure(failure));
            }
            self.unload_locked(&mut lc, None);
            self.load_locked(&mut lc, &model_id)?;
        }
        if lc.state != RecognitionState::ModelLoaded {
            return Err(TriageError::InvalidState {
                operation: "start",
                state: lc.state,
            });
        }

        let options = StartOptions { timeout_ms };
        let sink = EventSink {
            tx: self.event_tx.clone(),
        };
        let failure = match lc.engine.start(&options, sink) {
            Ok(true) => {
                self.set_state(&mut lc, RecognitionState::Listening, None);
                info!(timeout_ms, "recognition session listening");
                return Ok(());
            }
            Ok(false) => "engine declined to start".to_string(),
            Err(e) => e.to_string(),
        };

        warn!(reason = %failure, "recognition start failed; unloading session");
        if let Err(e) = lc.engine.stop() {
            debug!("stop during start cleanup failed: {e}");
        }
        self.unload_locked(&mut lc, Some(failure.clone()));
        Err(TriageError::SessionStartFailure(failure))
    }

    /// Stop listening. No-op when not listening.
    ///
    /// # Errors
    /// `TriageError::Recognition` if the engine fails to stop; the session
    /// then stays `Listening`.
    pub fn stop(&self) -> Result<()> {
        let mut lc = self.lifecycle.lock();
        if lc.state != RecognitionState::Listening {
            return Ok(());
        }
        self.stop_locked(&mut lc)
    }

    /// Release the engine's model and the classifier session.
    ///
    /// # Errors
    /// `TriageError::InvalidState` while listening; call `stop()` first.
    pub fn unload(&self) -> Result<()> {
        let mut lc = self.lifecycle.lock();
        if lc.state == RecognitionState::Listening {
            return Err(TriageError::InvalidState {
                operation: "unload",
                state: lc.state,
            });
        }
        self.unload_locked(&mut lc, None);
        Ok(())
    }

    /// Ordered teardown: stop, then unload.
    pub fn shutdown(&self) -> Result<()> {
        let mut lc = self.lifecycle.lock();
        if lc.state == RecognitionState::Listening {
            self.stop_locked(&mut lc)?;
        }
        self.unload_locked(&mut lc, None);
        Ok(())
    }

    /// Current session state (snapshot).
    pub fn state(&self) -> RecognitionState {
        self.lifecycle.lock().state
    }

    /// Subscribe to transcript, error and timeout events.
    pub fn subscribe(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to session state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<SessionStateEvent> {
        self.state_tx.subscribe()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn load_locked(&self, lc: &mut Lifecycle, model_id: &str) -> Result<()> {
        info!(model_id, "loading recognition model");
        if let Err(e) = lc.engine.load_model(model_id) {
            warn!(model_id, "recognition model rejected: {e}");
            return Err(TriageError::ModelLoadFailure(e.to_string()));
        }
        if !wait_until_ready(lc.engine.as_ref(), &self.config.readiness) {
            lc.engine.unload();
            return Err(TriageError::ModelLoadFailure(format!(
                "engine did not settle after loading {model_id}"
            )));
        }
        lc.model_id = Some(model_id.to_owned());
        self.set_state(lc, RecognitionState::ModelLoaded, None);
        info!(model_id, "recognition model loaded");
        Ok(())
    }

    fn stop_locked(&self, lc: &mut Lifecycle) -> Result<()> {
        lc.engine
            .stop()
            .map_err(|e| TriageError::Recognition(e.to_string()))?;
        if !wait_until_ready(lc.engine.as_ref(), &self.config.readiness) {
            warn!("recognition engine still busy after stop");
        }
        self.set_state(lc, RecognitionState::ModelLoaded, None);
        info!("recognition session stopped");
        Ok(())
    }

    /// Unload the engine and the classifier session. `detail` rides on the
    /// single `Unloaded` state event.
    fn unload_locked(&self, lc: &mut Lifecycle, detail: Option<String>) {
        if lc.state != RecognitionState::Unloaded {
            lc.engine.unload();
            if !wait_until_ready(lc.engine.as_ref(), &self.config.readiness) {
                warn!("recognition engine still busy after unload");
            }
            lc.model_id = None;
            self.set_state(lc, RecognitionState::Unloaded, detail);
            info!("recognition model unloaded");
        }
        self.inference.unload();
    }

    fn set_state(&self, lc: &mut Lifecycle, state: RecognitionState, detail: Option<String>) {
        lc.state = state;
        let _ = self.state_tx.send(SessionStateEvent { state, detail });
    }
}
