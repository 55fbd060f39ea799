use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FeatureValue;

/// Which features apply to one species. Codes without an entry are not applicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicabilityRow {
    pub species: String,
    pub features: BTreeMap<String, bool>,
}

/// Feature values describing one species. `None` marks an empty cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRow {
    pub species: String,
    pub values: BTreeMap<String, Option<FeatureValue>>,
}

/// Input for adding a species to the taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSpeciesInput {
    pub name: String,
}

/// One feature line in a species profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub label: String,
    pub code: String,
    pub applicable: bool,
    pub value: Option<FeatureValue>,
}

/// Everything the knowledge base records about a species, in registry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesProfile {
    pub species: String,
    pub entries: Vec<ProfileEntry>,
}

/// A stored value that no longer fits its feature's current setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainViolation {
    pub species: String,
    pub code: String,
    pub value: FeatureValue,
}

/// What an explicit cascade pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Feature codes dropped from the applicability and value tables.
    pub dropped_columns: Vec<String>,
    /// Species rows dropped from the applicability and value tables.
    pub dropped_rows: Vec<String>,
}
