//! Error types for knowledge-base, inference and page operations.

use thiserror::Error;

use crate::models::Page;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored table does not match its schema.
    #[error("Malformed table {file} (row {row}, column {column}): {reason}")]
    MalformedTable {
        file: String,
        row: usize,
        column: String,
        reason: String,
    },

    /// The code could not be used as part of a file name.
    #[error("Invalid feature code '{0}': codes must be non-empty and must not contain '/', '\\' or '..'")]
    InvalidFeatureCode(String),

    #[error("Feature not found: {0}")]
    UnknownFeature(String),

    #[error("Species not found: {0}")]
    UnknownSpecies(String),

    #[error("Feature {code} is {actual}, expected {expected}")]
    KindMismatch {
        code: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid range: min {min} is greater than max {max}")]
    InvalidRange { min: i64, max: i64 },

    /// Applicable features left empty on save. Nothing was written.
    #[error("Fill in values for features: {}", .labels.join(", "))]
    MissingValues { labels: Vec<String> },

    #[error("Value '{value}' is outside the domain of feature {label}")]
    OutOfDomain { label: String, value: String },

    /// Classification cannot run while a feature has no values to pick from.
    #[error("Value list for '{label}' is empty; add values in the knowledge base")]
    EmptyEnumValues { label: String },

    #[error("Classifier model is not loaded")]
    ModelUnavailable,

    /// The model was trained on a different number of features than are registered.
    #[error("Model expects {expected} features, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Cannot {action} from the {} page", .from.as_str())]
    InvalidTransition { from: Page, action: &'static str },
}

impl Error {
    pub(crate) fn malformed(
        file: &str,
        row: usize,
        column: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedTable {
            file: file.to_string(),
            row,
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors caused by user input rather than storage or model failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidFeatureCode(_)
                | Self::KindMismatch { .. }
                | Self::InvalidRange { .. }
                | Self::MissingValues { .. }
                | Self::OutOfDomain { .. }
                | Self::EmptyEnumValues { .. }
                | Self::InvalidTransition { .. }
        )
    }
}
