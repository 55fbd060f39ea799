//! Plain-text rendering for terminal output.

use crate::models::{Feature, SpeciesProfile, ValueSetting};

const APPLICABLE: char = '●';
const NOT_APPLICABLE: char = '○';
const NO_VALUE: &str = "-";

/// Render a species profile as a tree, one branch per registered feature.
///
/// Example output:
/// ```text
/// Sparrow
/// ├── ● Color: Red
/// ├── ● Body size (body_size): -
/// └── ○ Habitat (habitat)
/// ```
pub fn render_profile(profile: &SpeciesProfile) -> String {
    let mut output = String::new();
    output.push_str(&profile.species);
    output.push('\n');

    for (i, entry) in profile.entries.iter().enumerate() {
        let is_last = i == profile.entries.len() - 1;
        output.push_str(if is_last { "└── " } else { "├── " });

        if entry.applicable {
            output.push(APPLICABLE);
            output.push(' ');
            output.push_str(&entry.label);
            output.push_str(": ");
            match &entry.value {
                Some(value) => output.push_str(&value.to_string()),
                None => output.push_str(NO_VALUE),
            }
        } else {
            output.push(NOT_APPLICABLE);
            output.push(' ');
            output.push_str(&entry.label);
        }
        output.push('\n');
    }
    output
}

/// Render registered features with their domains, one per line.
pub fn render_domains(domains: &[(Feature, ValueSetting)]) -> String {
    let mut output = String::new();
    for (i, (feature, setting)) in domains.iter().enumerate() {
        let domain = match setting {
            ValueSetting::Range { min, max } => format!("numeric {}..={}", min, max),
            ValueSetting::Enum { values } if values.is_empty() => "enumerable (no values)".into(),
            ValueSetting::Enum { values } => format!("enumerable {}", values.join(", ")),
        };
        output.push_str(&format!(
            "{:>3}. {} [{}] {}\n",
            i, feature.label, feature.code, domain
        ));
    }
    output
}
