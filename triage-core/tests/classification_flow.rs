use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc as std_mpsc, Arc,
};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use triage_core::inference::{NamedOutput, OutputValues};
use triage_core::listener::drive;
use triage_core::recognition::{
    EventSink, ReadinessBackoff, ScriptedEngine, StartOptions, StaticPermission,
};
use triage_core::{
    BusyPolicy, ClassificationPipeline, ClassifiedReport, ClassifierSession,
    ClassifyingListener, InferenceEngine, LabelTable, RecognitionConfig, RecognitionEngine,
    RecognitionSessionManager, RecognitionState, Result, SessionLoader, TranscriptListener,
    TriageError, VocabularyModel,
};

// ── Test doubles ────────────────────────────────────────────────────────────

#[derive(Default)]
struct EngineLog {
    loads: usize,
    starts: usize,
    stops: usize,
    unloads: usize,
    calls: Vec<&'static str>,
}

#[derive(Clone, Default)]
struct RecordingEngine {
    log: Arc<Mutex<EngineLog>>,
    reject_load: Arc<AtomicBool>,
    fail_start: Arc<AtomicBool>,
    fail_stop: Arc<AtomicBool>,
}

impl RecognitionEngine for RecordingEngine {
    fn load_model(&mut self, _model_id: &str) -> Result<()> {
        let mut log = self.log.lock();
        log.calls.push("load");
        if self.reject_load.load(Ordering::SeqCst) {
            return Err(TriageError::Recognition("model not bundled".into()));
        }
        log.loads += 1;
        Ok(())
    }

    fn start(&mut self, _options: &StartOptions, events: EventSink) -> Result<bool> {
        let mut log = self.log.lock();
        log.calls.push("start");
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TriageError::Recognition("audio device busy".into()));
        }
        log.starts += 1;
        events.partial("listening");
        Ok(true)
    }

    fn stop(&mut self) -> Result<()> {
        let mut log = self.log.lock();
        log.calls.push("stop");
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(TriageError::Recognition("microphone stuck open".into()));
        }
        log.stops += 1;
        Ok(())
    }

    fn unload(&mut self) {
        let mut log = self.log.lock();
        log.calls.push("unload");
        log.unloads += 1;
    }
}

struct LabelSession {
    indicators: Vec<i64>,
    runs: Arc<AtomicUsize>,
}

impl ClassifierSession for LabelSession {
    fn run(&mut self, _features: &[f32]) -> Result<Vec<NamedOutput>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(vec![NamedOutput::new(
            "output_label",
            OutputValues::I64(self.indicators.clone()),
        )])
    }

    fn input_names(&self) -> Vec<String> {
        vec!["float_input".into()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["output_label".into()]
    }
}

struct LabelLoader {
    indicators: Vec<i64>,
    runs: Arc<AtomicUsize>,
}

impl SessionLoader for LabelLoader {
    fn load(&self) -> Result<Box<dyn ClassifierSession>> {
        Ok(Box::new(LabelSession {
            indicators: self.indicators.clone(),
            runs: Arc::clone(&self.runs),
        }))
    }
}

/// Session whose first run blocks until released; later runs return at once.
struct GatedSession {
    entered: std_mpsc::Sender<()>,
    release: Mutex<std_mpsc::Receiver<()>>,
    runs: Arc<AtomicUsize>,
}

impl ClassifierSession for GatedSession {
    fn run(&mut self, _features: &[f32]) -> Result<Vec<NamedOutput>> {
        if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.entered.send(());
            let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
        }
        Ok(vec![NamedOutput::new("label", OutputValues::I64(vec![1, 0, 0]))])
    }

    fn input_names(&self) -> Vec<String> {
        vec!["float_input".into()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["label".into()]
    }
}

struct GatedLoader(Mutex<Option<GatedSession>>);

impl SessionLoader for GatedLoader {
    fn load(&self) -> Result<Box<dyn ClassifierSession>> {
        self.0
            .lock()
            .take()
            .map(|s| Box::new(s) as Box<dyn ClassifierSession>)
            .ok_or_else(|| TriageError::OnnxSession("gated session already taken".into()))
    }
}

fn vocabulary() -> VocabularyModel {
    VocabularyModel::new(
        vec![
            "fire".into(),
            "smoke".into(),
            "robbery".into(),
            "gun".into(),
            "bleeding".into(),
            "unconscious".into(),
        ],
        vec![2.0, 1.5, 2.5, 2.2, 3.0, 2.8],
    )
    .expect("valid vocabulary")
}

fn labels() -> LabelTable {
    LabelTable::new(["['Fire']", "['Police']", "['Medical']"]).expect("valid labels")
}

fn fast_config() -> RecognitionConfig {
    RecognitionConfig {
        model_id: "small-en".into(),
        timeout_ms: 1_000,
        readiness: ReadinessBackoff {
            initial_ms: 1,
            max_ms: 2,
            attempts: 2,
        },
    }
}

fn manager_with(
    engine: RecordingEngine,
    granted: bool,
) -> (RecognitionSessionManager, Arc<InferenceEngine>) {
    let inference = Arc::new(InferenceEngine::new(LabelLoader {
        indicators: vec![1, 0, 0],
        runs: Arc::new(AtomicUsize::new(0)),
    }));
    let manager = RecognitionSessionManager::new(
        fast_config(),
        engine,
        Arc::new(StaticPermission(granted)),
        Arc::clone(&inference),
    );
    (manager, inference)
}

// ── Recognition lifecycle ───────────────────────────────────────────────────

#[test]
fn full_lifecycle_pairs_inference_unload_with_recognition_unload() {
    let engine = RecordingEngine::default();
    let (manager, inference) = manager_with(engine.clone(), true);
    let mut states = manager.subscribe_state();

    manager.load_model("small-en").expect("load");
    manager.start(1_000).expect("start");
    assert_eq!(manager.state(), RecognitionState::Listening);

    inference.ensure_loaded().expect("classifier session");
    assert!(inference.is_loaded());

    manager.stop().expect("stop");
    assert_eq!(manager.state(), RecognitionState::ModelLoaded);
    manager.unload().expect("unload");
    assert_eq!(manager.state(), RecognitionState::Unloaded);
    assert!(!inference.is_loaded());

    assert_eq!(
        engine.log.lock().calls,
        vec!["load", "start", "stop", "unload"]
    );

    let observed: Vec<RecognitionState> = std::iter::from_fn(|| states.try_recv().ok())
        .map(|event| event.state)
        .collect();
    assert_eq!(
        observed,
        vec![
            RecognitionState::ModelLoaded,
            RecognitionState::Listening,
            RecognitionState::ModelLoaded,
            RecognitionState::Unloaded,
        ]
    );
}

#[test]
fn start_without_permission_fails_fast() {
    let engine = RecordingEngine::default();
    let (manager, _) = manager_with(engine.clone(), false);
    manager.load_model("small-en").expect("load");

    assert!(matches!(
        manager.start(1_000),
        Err(TriageError::PermissionDenied)
    ));
    assert_eq!(manager.state(), RecognitionState::ModelLoaded);
    assert_eq!(engine.log.lock().starts, 0);
}

#[test]
fn start_requires_a_loaded_model() {
    let (manager, _) = manager_with(RecordingEngine::default(), true);
    assert!(matches!(
        manager.start(1_000),
        Err(TriageError::InvalidState {
            state: RecognitionState::Unloaded,
            ..
        })
    ));
}

#[test]
fn load_model_only_from_unloaded_and_maps_rejections() {
    let engine = RecordingEngine::default();
    let (manager, _) = manager_with(engine.clone(), true);

    engine.reject_load.store(true, Ordering::SeqCst);
    assert!(matches!(
        manager.load_model("small-en"),
        Err(TriageError::ModelLoadFailure(_))
    ));
    assert_eq!(manager.state(), RecognitionState::Unloaded);

    engine.reject_load.store(false, Ordering::SeqCst);
    manager.load_model("small-en").expect("load");
    assert_eq!(engine.log.lock().loads, 1);
    assert!(matches!(
        manager.load_model("small-en"),
        Err(TriageError::InvalidState { .. })
    ));
}

#[test]
fn start_while_listening_cycles_the_session() {
    let engine = RecordingEngine::default();
    let (manager, inference) = manager_with(engine.clone(), true);
    manager.load_model("small-en").expect("load");
    manager.start(1_000).expect("first start");
    inference.ensure_loaded().expect("classifier session");

    manager.start(1_000).expect("second start");
    assert_eq!(manager.state(), RecognitionState::Listening);
    assert!(!inference.is_loaded(), "cycle must drop the classifier session");
    assert_eq!(
        engine.log.lock().calls,
        vec!["load", "start", "stop", "unload", "load", "start"]
    );
}

#[test]
fn failed_start_falls_back_to_unloaded() {
    let engine = RecordingEngine::default();
    let (manager, inference) = manager_with(engine.clone(), true);
    manager.load_model("small-en").expect("load");
    inference.ensure_loaded().expect("classifier session");

    let mut states = manager.subscribe_state();

    engine.fail_start.store(true, Ordering::SeqCst);
    assert!(matches!(
        manager.start(1_000),
        Err(TriageError::SessionStartFailure(_))
    ));
    assert_eq!(manager.state(), RecognitionState::Unloaded);
    assert!(!inference.is_loaded());
    let log = engine.log.lock();
    assert_eq!(log.calls, vec!["load", "start", "stop", "unload"]);

    let observed: Vec<_> = std::iter::from_fn(|| states.try_recv().ok()).collect();
    assert_eq!(observed.len(), 1, "one state event per transition: {observed:?}");
    assert_eq!(observed[0].state, RecognitionState::Unloaded);
    assert!(observed[0]
        .detail
        .as_deref()
        .is_some_and(|d| d.contains("audio device busy")));
}

#[test]
fn failed_stop_during_restart_cycle_falls_back_to_unloaded() {
    let engine = RecordingEngine::default();
    let (manager, inference) = manager_with(engine.clone(), true);
    manager.load_model("small-en").expect("load");
    manager.start(1_000).expect("first start");
    inference.ensure_loaded().expect("classifier session");

    engine.fail_stop.store(true, Ordering::SeqCst);
    assert!(matches!(
        manager.start(1_000),
        Err(TriageError::SessionStartFailure(_))
    ));
    assert_eq!(manager.state(), RecognitionState::Unloaded);
    assert!(!inference.is_loaded());
    assert_eq!(
        engine.log.lock().calls,
        vec!["load", "start", "stop", "unload"]
    );

    engine.fail_stop.store(false, Ordering::SeqCst);
    manager.load_model("small-en").expect("reload after fallback");
    manager.start(1_000).expect("start after fallback");
    assert_eq!(manager.state(), RecognitionState::Listening);
}

#[test]
fn stop_is_a_noop_when_not_listening_and_unload_requires_stop() {
    let engine = RecordingEngine::default();
    let (manager, _) = manager_with(engine.clone(), true);
    manager.stop().expect("noop stop while unloaded");

    manager.load_model("small-en").expect("load");
    manager.start(1_000).expect("start");
    assert!(matches!(
        manager.unload(),
        Err(TriageError::InvalidState {
            state: RecognitionState::Listening,
            ..
        })
    ));

    manager.shutdown().expect("ordered teardown");
    assert_eq!(manager.state(), RecognitionState::Unloaded);
    assert_eq!(engine.log.lock().stops, 1);
    assert_eq!(engine.log.lock().unloads, 1);
}

// ── End to end ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn final_transcript_is_classified_and_submitted() {
    let runs = Arc::new(AtomicUsize::new(0));
    let inference = Arc::new(InferenceEngine::new(LabelLoader {
        indicators: vec![0, 1, 1],
        runs: Arc::clone(&runs),
    }));
    let pipeline = Arc::new(ClassificationPipeline::new(
        vocabulary(),
        labels(),
        Arc::clone(&inference),
    ));

    let (engine, feed) = ScriptedEngine::new();
    let manager = RecognitionSessionManager::new(
        fast_config(),
        engine,
        Arc::new(StaticPermission(true)),
        Arc::clone(&inference),
    );

    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ClassifiedReport>();
    let listener = Arc::new(ClassifyingListener::new(
        Arc::clone(&pipeline),
        report_tx,
        BusyPolicy::Drop,
    ));
    let driver = tokio::spawn(drive(manager.subscribe(), Arc::clone(&listener)));

    feed.push("There was a robbery and the clerk is bleeding");
    manager.load_model("small-en").expect("load");
    manager.start(1_000).expect("start");

    let report = tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
        .await
        .expect("report within timeout")
        .expect("report channel open");
    assert_eq!(report.transcript, "There was a robbery and the clerk is bleeding");
    assert_eq!(report.classification.labels(), ["Police", "Medical"]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        listener.latest_partial().as_deref(),
        Some("There was a robbery and")
    );

    manager.shutdown().expect("shutdown");
    assert!(!inference.is_loaded());
    drop(manager);
    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .expect("driver exits once the manager is gone")
        .expect("driver task panicked");
}

// ── Busy policies ───────────────────────────────────────────────────────────

fn gated_pipeline() -> (
    Arc<ClassificationPipeline>,
    std_mpsc::Receiver<()>,
    std_mpsc::Sender<()>,
    Arc<AtomicUsize>,
) {
    let (entered_tx, entered_rx) = std_mpsc::channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = InferenceEngine::new(GatedLoader(Mutex::new(Some(GatedSession {
        entered: entered_tx,
        release: Mutex::new(release_rx),
        runs: Arc::clone(&runs),
    }))));
    let pipeline = Arc::new(ClassificationPipeline::new(
        vocabulary(),
        labels(),
        Arc::new(engine),
    ));
    (pipeline, entered_rx, release_tx, runs)
}

fn collect_reports(rx: &mut mpsc::UnboundedReceiver<ClassifiedReport>) -> Vec<String> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|r| r.transcript)
        .collect()
}

#[test]
fn drop_policy_discards_finals_that_arrive_while_busy() {
    let (pipeline, entered, release, runs) = gated_pipeline();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Arc::new(ClassifyingListener::new(pipeline, tx, BusyPolicy::Drop));

    let first = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.on_final("fire in the stairwell"))
    };
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("first final reaches inference");

    listener.on_final("more smoke now");
    release.send(()).expect("release");
    first.join().expect("listener thread panicked");

    assert_eq!(collect_reports(&mut rx), vec!["fire in the stairwell"]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn queue_latest_policy_runs_the_newest_pending_final_afterwards() {
    let (pipeline, entered, release, runs) = gated_pipeline();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Arc::new(ClassifyingListener::new(
        pipeline,
        tx,
        BusyPolicy::QueueLatest,
    ));

    let first = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.on_final("fire in the stairwell"))
    };
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("first final reaches inference");

    listener.on_final("more smoke now");
    listener.on_final("smoke everywhere, fire on two floors");
    release.send(()).expect("release");
    first.join().expect("listener thread panicked");

    assert_eq!(
        collect_reports(&mut rx),
        vec![
            "fire in the stairwell",
            "smoke everywhere, fire on two floors"
        ]
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}
