use serde::{Deserialize, Serialize};

use super::ValueSetting;

/// A phenotype feature used to describe and classify species.
///
/// The `code` is the internal identifier used as a column name in the
/// applicability and value tables and as the key for value settings.
/// The label is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub label: String,
    pub code: String,
}

impl Feature {
    /// Build a feature from a display label, deriving its code.
    pub fn from_label(label: impl Into<String>) -> Self {
        let label = label.into();
        let code = derive_code(&label);
        Self { label, code }
    }
}

/// Derive a feature code from its display label.
///
/// A parenthesized part wins: `"Beak type (beak_type)"` becomes `beak_type`.
/// Otherwise the label is lowercased with spaces replaced by underscores.
/// Different labels may produce the same code; nothing checks for that.
pub fn derive_code(label: &str) -> String {
    if let Some(open) = label.find('(') {
        let rest = &label[open + 1..];
        let inner = match rest.find(')') {
            Some(close) => &rest[..close],
            None => rest,
        };
        let inner = inner.trim();
        if !inner.is_empty() {
            return inner.to_string();
        }
    }
    label.replace(' ', "_").to_lowercase()
}

/// Input for registering a new feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFeatureInput {
    pub label: String,
}

/// A feature with its value setting, used for listing responses.
///
/// The `feature` fields are flattened into the JSON response next to `setting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDomain {
    #[serde(flatten)]
    pub feature: Feature,
    pub setting: ValueSetting,
}

/// The features every fresh knowledge base starts with when seeding is enabled.
pub fn default_features() -> Vec<Feature> {
    [
        "Beak type (beak_type)",
        "Plumage color (plumage_color)",
        "Eye color (eye_color)",
        "Habitat (habitat)",
        "Feeding type (feeding_type)",
        "Body size (body_size)",
    ]
    .into_iter()
    .map(Feature::from_label)
    .collect()
}
