//! Domain models for the bird knowledge base.
//!
//! # Core Concepts
//!
//! - [`Feature`]: A phenotype feature with a display label and a stable code.
//!   The registry order of features is the column order the classifier expects.
//! - [`ValueSetting`]: The domain of a feature, either a numeric range or an
//!   ordered list of enumerable labels. Exactly one per feature code.
//! - [`ApplicabilityRow`]: Which features are relevant for a species.
//! - [`ValueRow`]: Concrete feature values describing a species, populated
//!   only for applicable features.
//! - [`Page`]: The view the interactive front-end is showing.

mod feature;
mod page;
mod species;
mod value;

pub use feature::*;
pub use page::*;
pub use species::*;
pub use value::*;
