use serde::{Deserialize, Serialize};

/// The view the front-end is currently showing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    #[default]
    Main,
    Edit,
    Classify,
}

impl Page {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Edit => "edit",
            Self::Classify => "classify",
        }
    }
}
