//! Classification output types.

use serde::{Deserialize, Serialize};

use crate::vocab::UNKNOWN_LABEL;

/// Labels selected for one transcript, or the sentinel `["unknown"]`.
///
/// Never empty. Serializes as a plain JSON string array; an empty array
/// deserializes to the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct ClassificationResult(Vec<String>);

impl From<Vec<String>> for ClassificationResult {
    fn from(labels: Vec<String>) -> Self {
        Self::from_labels(labels)
    }
}

impl ClassificationResult {
    /// The sentinel result.
    pub fn unknown() -> Self {
        Self(vec![UNKNOWN_LABEL.to_owned()])
    }

    /// Wrap decoded labels; an empty selection becomes the sentinel.
    pub fn from_labels(labels: Vec<String>) -> Self {
        if labels.is_empty() {
            Self::unknown()
        } else {
            Self(labels)
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0.len() == 1 && self.0[0] == UNKNOWN_LABEL
    }

    /// Emergency services named by the labels, in label order.
    pub fn services(&self) -> Vec<EmergencyService> {
        let mut services = Vec::new();
        for service in self.0.iter().filter_map(|l| EmergencyService::from_label(l)) {
            if !services.contains(&service) {
                services.push(service);
            }
        }
        services
    }

    pub fn into_labels(self) -> Vec<String> {
        self.0
    }
}

/// Services a report can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyService {
    Fire,
    Police,
    Medical,
}

impl EmergencyService {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "fire" => Some(Self::Fire),
            "police" | "crime" => Some(Self::Police),
            "medical" | "ambulance" => Some(Self::Medical),
            _ => None,
        }
    }
}
