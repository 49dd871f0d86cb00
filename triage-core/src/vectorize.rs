//! Transcript → tf-idf feature vector.
//!
//! The algorithm must reproduce the feature space the classifier was trained
//! on, bit for bit:
//!
//! ```text
//! lowercase → extract [A-Za-z0-9_]+ runs → v[i] += idf[i] per occurrence
//! ```
//!
//! No term-frequency scaling and no L2 normalisation are applied.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::vocab::VocabularyModel;

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("static word pattern"));

/// Dense feature vector positionally aligned with a `VocabularyModel`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `true` when no vocabulary token matched the input.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Single-precision copy for the model input tensor.
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|v| *v as f32).collect()
    }
}

/// Lower-case `text` and split it into word tokens, order and duplicates kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_owned())
        .collect()
}

/// Vectorize `text` against `vocab`. Always returns exactly `vocab.len()` values.
pub fn vectorize(text: &str, vocab: &VocabularyModel) -> FeatureVector {
    let tokens = tokenize(text);
    let mut vector = FeatureVector::zeros(vocab.len());
    let mut matched = 0usize;

    for token in &tokens {
        let Some(index) = vocab.position(token) else {
            continue;
        };
        if let Some(weight) = vocab.idf(index) {
            vector.values[index] += weight;
            matched += 1;
        }
    }

    debug!(tokens = tokens.len(), matched, "transcript vectorized");
    vector
}
