//! Training-time artifacts: the tf-idf vocabulary and the label table.
//!
//! Both are loaded once at startup and never mutated afterwards. Loading
//! fails fast on any inconsistency so that no transcript is ever vectorized
//! against a table that disagrees with the trained model.
//!
//! ## Artifact formats
//!
//! | File | Shape |
//! |------|-------|
//! | `tfidf_config.json` | `{ "vocabulary": [string], "idf": [number] }` |
//! | `label_classes.json` | `[string]` |
//! | `classifier.onnx` | serialized model graph |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, TriageError};

/// Label emitted when no category can be decided.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Raw tf-idf document as exported at training time.
#[derive(Debug, Clone, Deserialize)]
pub struct TfidfConfig {
    pub vocabulary: Vec<String>,
    pub idf: Vec<f64>,
}

/// Vocabulary tokens paired positionally with their idf weights.
#[derive(Debug, Clone)]
pub struct VocabularyModel {
    vocabulary: Vec<String>,
    idf: Vec<f64>,
    index: HashMap<String, usize>,
}

impl VocabularyModel {
    /// Validate and index a vocabulary.
    ///
    /// # Errors
    /// `TriageError::ConfigMismatch` if the two sequences differ in length.
    pub fn new(vocabulary: Vec<String>, idf: Vec<f64>) -> Result<Self> {
        if vocabulary.len() != idf.len() {
            return Err(TriageError::ConfigMismatch {
                vocabulary: vocabulary.len(),
                idf: idf.len(),
            });
        }

        // Later duplicates overwrite earlier ones, matching the exported lookup.
        let index = vocabulary
            .iter()
            .enumerate()
            .map(|(i, token)| (token.clone(), i))
            .collect();

        Ok(Self {
            vocabulary,
            idf,
            index,
        })
    }

    pub fn from_config(config: TfidfConfig) -> Result<Self> {
        Self::new(config.vocabulary, config.idf)
    }

    /// Parse a tf-idf JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        Self::from_config(serde_json::from_str(raw)?)
    }

    /// Number of features (N).
    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// Position of `token` in the vocabulary (exact match).
    pub fn position(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    pub fn idf(&self, index: usize) -> Option<f64> {
        self.idf.get(index).copied()
    }
}

/// Ordered category names; position `i` names the i-th classifier output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Build a table from raw exported entries, stripping serialization
    /// artifacts (`[`, `]`, quotes, whitespace) from each one.
    ///
    /// # Errors
    /// `TriageError::InvalidLabelTable` if the table is empty or an entry is
    /// empty after cleaning.
    pub fn new<I, S>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels = Vec::new();
        for (i, entry) in raw.into_iter().enumerate() {
            let cleaned = clean_label(entry.as_ref());
            if cleaned.is_empty() {
                return Err(TriageError::InvalidLabelTable(format!(
                    "entry {i} ({:?}) is empty after cleaning",
                    entry.as_ref()
                )));
            }
            labels.push(cleaned);
        }
        if labels.is_empty() {
            return Err(TriageError::InvalidLabelTable("no labels".into()));
        }
        Ok(Self { labels })
    }

    /// Parse a label JSON document (an array of strings).
    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: Vec<String> = serde_json::from_str(raw)?;
        Self::new(entries)
    }

    /// Number of output classes (M).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Name for an output position; positions past the table decode to
    /// `unknown_<index>`.
    pub fn name_for(&self, index: usize) -> String {
        self.get(index)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{UNKNOWN_LABEL}_{index}"))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

fn clean_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '[' | ']' | '\'' | '"') && !c.is_whitespace())
        .collect()
}

/// Locations of the three classifier artifacts.
#[derive(Debug, Clone)]
pub struct AssetPaths {
    pub tfidf_path: PathBuf,
    pub labels_path: PathBuf,
    pub model_path: PathBuf,
}

impl AssetPaths {
    /// Conventional file names inside one asset directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            tfidf_path: dir.join("tfidf_config.json"),
            labels_path: dir.join("label_classes.json"),
            model_path: dir.join("classifier.onnx"),
        }
    }
}

/// Everything loaded from disk at process start.
#[derive(Debug, Clone)]
pub struct ClassifierAssets {
    pub vocabulary: VocabularyModel,
    pub labels: LabelTable,
    pub model_path: PathBuf,
}

impl ClassifierAssets {
    /// Load and validate all artifacts. Any failure here is fatal for the
    /// pipeline: nothing may be classified against a partial configuration.
    pub fn load(paths: &AssetPaths) -> Result<Self> {
        let vocabulary = VocabularyModel::from_json(&read_artifact(&paths.tfidf_path)?)?;
        let labels = LabelTable::from_json(&read_artifact(&paths.labels_path)?)?;
        if !paths.model_path.exists() {
            return Err(TriageError::ModelNotFound {
                path: paths.model_path.clone(),
            });
        }

        info!(
            features = vocabulary.len(),
            classes = labels.len(),
            model = ?paths.model_path,
            "classifier assets loaded"
        );

        Ok(Self {
            vocabulary,
            labels,
            model_path: paths.model_path.clone(),
        })
    }
}

fn read_artifact(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(TriageError::ModelNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(std::fs::read_to_string(path)?)
}
