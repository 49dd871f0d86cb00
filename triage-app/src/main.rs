//! Triage host entry point.
//!
//! Reads one spoken-report transcript per stdin line, replays each through a
//! scripted recognition session, and prints every classified report as a
//! JSON line on stdout. Logs go to stderr.
//!
//! ```text
//! $ echo "smoke is coming out of the kitchen" | triage
//! {"transcript":"smoke is coming out of the kitchen","classification":["Fire"],"classifiedAt":"..."}
//! ```

mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use settings::{default_settings_path, load_settings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use triage_core::{
    listener::drive,
    recognition::{ScriptedEngine, StaticPermission},
    ClassificationPipeline, ClassifiedReport, ClassifierAssets, ClassifyingListener,
    InferenceEngine, OnnxSessionConfig, OnnxSessionLoader, RecognitionSessionManager,
};

#[tokio::main]
async fn main() {
    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);

    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&app_settings.log_filter)),
        )
        .init();

    info!(settings = ?settings_path, "triage starting");
    if let Err(e) = run(app_settings).await {
        tracing::error!("triage failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(app_settings: settings::AppSettings) -> anyhow::Result<()> {
    let paths = app_settings.asset_paths();
    let assets = ClassifierAssets::load(&paths).context("loading classifier assets")?;

    let mut onnx_config = OnnxSessionConfig::new(assets.model_path.clone());
    onnx_config.intra_threads = app_settings.ort_intra_threads;
    let inference = Arc::new(InferenceEngine::new(OnnxSessionLoader::new(onnx_config)));
    let pipeline = Arc::new(ClassificationPipeline::from_assets(
        assets,
        Arc::clone(&inference),
    ));

    let (engine, feed) = ScriptedEngine::new();
    let manager = Arc::new(RecognitionSessionManager::new(
        app_settings.recognition.clone(),
        engine,
        Arc::new(StaticPermission(app_settings.microphone_granted)),
        Arc::clone(&inference),
    ));

    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ClassifiedReport>();
    let listener = Arc::new(ClassifyingListener::new(
        Arc::clone(&pipeline),
        report_tx,
        app_settings.busy_policy,
    ));
    let driver = tokio::spawn(drive(manager.subscribe(), listener));

    let model_id = app_settings.recognition.model_id.clone();
    with_manager(&manager, move |m| m.load_model(&model_id))
        .await
        .context("loading recognition model")?;

    let timeout_ms = app_settings.recognition.timeout_ms;
    let report_timeout = Duration::from_secs(app_settings.report_timeout_secs);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        // A report that missed the previous line's deadline must not be
        // printed against this one.
        drain_stale_reports(&mut report_rx);

        feed.push(line);
        with_manager(&manager, move |m| m.start(timeout_ms))
            .await
            .context("starting recognition session")?;

        match tokio::time::timeout(report_timeout, report_rx.recv()).await {
            Ok(Some(report)) => {
                println!("{}", serde_json::to_string(&report)?);
            }
            Ok(None) => break,
            Err(_) => warn!("no classified report within {report_timeout:?}"),
        }
        with_manager(&manager, |m| m.stop())
            .await
            .context("stopping recognition session")?;
    }

    with_manager(&manager, |m| m.shutdown())
        .await
        .context("tearing down recognition session")?;
    let diagnostics = pipeline.diagnostics_snapshot();
    info!(
        classified = diagnostics.classify_calls,
        dropped = diagnostics.dropped_busy,
        unknown = diagnostics.unknown_results,
        inference_errors = diagnostics.inference_errors,
        "triage finished"
    );

    drop(manager);
    let _ = driver.await;
    Ok(())
}

fn drain_stale_reports(rx: &mut mpsc::UnboundedReceiver<ClassifiedReport>) -> usize {
    let mut drained = 0;
    while let Ok(stale) = rx.try_recv() {
        warn!(transcript = %stale.transcript, "discarding late report");
        drained += 1;
    }
    drained
}

/// Lifecycle calls hold the manager lock while the engine settles; keep them
/// off the async workers.
async fn with_manager<T, F>(manager: &Arc<RecognitionSessionManager>, op: F) -> anyhow::Result<T>
where
    F: FnOnce(&RecognitionSessionManager) -> triage_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let manager = Arc::clone(manager);
    let result = tokio::task::spawn_blocking(move || op(&manager))
        .await
        .context("recognition lifecycle task failed")?;
    Ok(result?)
}
