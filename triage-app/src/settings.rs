//! Persistent host settings (JSON file next to the binary or at `TRIAGE_SETTINGS`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use triage_core::{AssetPaths, BusyPolicy, RecognitionConfig};

const DEFAULT_ASSET_DIR: &str = "assets";
const DEFAULT_LOG_FILTER: &str = "triage_app=info,triage_core=info";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Directory holding `tfidf_config.json`, `label_classes.json` and
    /// `classifier.onnx`. Overridden by `TRIAGE_MODEL_DIR`.
    pub asset_dir: String,
    pub recognition: RecognitionConfig,
    pub busy_policy: BusyPolicy,
    /// Stand-in for the platform microphone permission prompt.
    pub microphone_granted: bool,
    pub ort_intra_threads: Option<usize>,
    /// Seconds to wait for a classified report per utterance.
    pub report_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            asset_dir: DEFAULT_ASSET_DIR.into(),
            recognition: RecognitionConfig::default(),
            busy_policy: BusyPolicy::Drop,
            microphone_granted: true,
            ort_intra_threads: None,
            report_timeout_secs: 10,
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.asset_dir = self.asset_dir.trim().to_string();
        if self.asset_dir.is_empty() {
            self.asset_dir = DEFAULT_ASSET_DIR.into();
        }
        self.recognition.model_id = self.recognition.model_id.trim().to_string();
        if self.recognition.model_id.is_empty() {
            self.recognition.model_id = RecognitionConfig::default().model_id;
        }
        self.recognition.timeout_ms = self.recognition.timeout_ms.clamp(1_000, 300_000);
        self.recognition.readiness.attempts = self.recognition.readiness.attempts.min(16);
        self.ort_intra_threads = self.ort_intra_threads.map(|n| n.clamp(1, 16));
        self.report_timeout_secs = self.report_timeout_secs.clamp(1, 120);
        if self.log_filter.trim().is_empty() {
            self.log_filter = DEFAULT_LOG_FILTER.into();
        }
    }

    /// Asset locations, honouring the `TRIAGE_MODEL_DIR` override.
    pub fn asset_paths(&self) -> AssetPaths {
        let dir = std::env::var("TRIAGE_MODEL_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.asset_dir.clone());
        AssetPaths::in_dir(dir)
    }
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os("TRIAGE_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("triage-settings.json"))
}

/// Read settings, falling back to defaults when the file is absent or malformed.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}
