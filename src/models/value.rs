use std::fmt;

use serde::{Deserialize, Serialize};

/// Range used for numeric features that have no configured bounds yet.
pub const DEFAULT_RANGE: (i64, i64) = (0, 100);

/// Which kind of domain a feature has.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Numeric,
    Enumerable,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Enumerable => "enumerable",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" => Some(Self::Numeric),
            "enumerable" => Some(Self::Enumerable),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The domain of a single feature.
///
/// Switching kinds replaces the setting wholesale, so a feature never
/// carries both a range and a value list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueSetting {
    #[serde(rename = "numeric")]
    Range { min: i64, max: i64 },
    #[serde(rename = "enumerable")]
    Enum { values: Vec<String> },
}

impl Default for ValueSetting {
    fn default() -> Self {
        Self::Enum { values: Vec::new() }
    }
}

impl ValueSetting {
    /// The empty setting of a kind.
    pub fn empty(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Numeric => Self::Range {
                min: DEFAULT_RANGE.0,
                max: DEFAULT_RANGE.1,
            },
            ValueKind::Enumerable => Self::default(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Range { .. } => ValueKind::Numeric,
            Self::Enum { .. } => ValueKind::Enumerable,
        }
    }

    pub fn range(&self) -> Option<(i64, i64)> {
        match self {
            Self::Range { min, max } => Some((*min, *max)),
            Self::Enum { .. } => None,
        }
    }

    pub fn enum_values(&self) -> Option<&[String]> {
        match self {
            Self::Enum { values } => Some(values),
            Self::Range { .. } => None,
        }
    }

    /// Whether `value` lies inside this domain.
    pub fn admits(&self, value: &FeatureValue) -> bool {
        match self {
            Self::Range { min, max } => value
                .as_number()
                .is_some_and(|n| (*min..=*max).contains(&n)),
            Self::Enum { values } => {
                let label = value.to_string();
                values.iter().any(|v| *v == label)
            }
        }
    }

    /// Type a value the way this domain stores it.
    ///
    /// Enumerable domains keep the exact label text, so `"007"` stays a
    /// label. Numeric domains turn integral text into a `Number`.
    pub fn coerce(&self, value: &FeatureValue) -> FeatureValue {
        match self {
            Self::Range { .. } => {
                FeatureValue::parse_cell(&value.to_string()).unwrap_or_else(|| value.clone())
            }
            Self::Enum { .. } => FeatureValue::Label(value.to_string()),
        }
    }
}

/// A concrete value stored for a (species, feature) pair.
///
/// Cells are read from disk as labels and typed against the feature's
/// setting with [`ValueSetting::coerce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(i64),
    Label(String),
}

impl FeatureValue {
    /// Parse a cell whose feature kind is unknown. Empty cells are null.
    pub fn parse_cell(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Some(Self::Number(n));
        }
        // pandas writes integer columns holding NaN as floats ("85.0")
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                return Some(Self::Number(f as i64));
            }
        }
        Some(Self::Label(raw.to_string()))
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Label(s) => s.trim().parse().ok(),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Label(s) if s.trim().is_empty())
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Label(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FeatureValue {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        Self::Label(s.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> Self {
        Self::Label(s)
    }
}

/// Input for switching a feature's value kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetKindInput {
    pub kind: ValueKind,
}

/// Input for configuring a numeric range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRangeInput {
    pub min: i64,
    pub max: i64,
}

/// Input for appending an enumerable value label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEnumValueInput {
    pub value: String,
}
