//! Species prediction from a feature vector.
//!
//! The classifier is trained elsewhere. It expects one number per
//! registered feature, in registry order: numeric features pass their
//! value, enumerable features pass the zero-based index of the selected
//! label in the feature's current value list. Nothing here can tell
//! whether that order and those indices still match what the model was
//! trained on; keeping them aligned is up to whoever edits the knowledge
//! base.

mod mlp;

use std::collections::BTreeMap;
use std::path::Path;

pub use mlp::{Activation, DenseLayer, LabelEncoder, MlpClassifier};

use crate::error::{Error, Result};
use crate::models::{Feature, FeatureValue, ValueSetting};

/// A pre-trained model returning an encoded class label.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<usize>;
}

/// Maps an encoded class label back to a species name.
pub trait LabelDecoder: Send + Sync {
    fn decode(&self, encoded: usize) -> Result<String>;
}

/// A classifier paired with the decoder for its labels.
pub struct InferenceAdapter {
    classifier: Box<dyn Classifier>,
    decoder: Box<dyn LabelDecoder>,
}

impl InferenceAdapter {
    pub fn new(
        classifier: impl Classifier + 'static,
        decoder: impl LabelDecoder + 'static,
    ) -> Self {
        Self {
            classifier: Box::new(classifier),
            decoder: Box::new(decoder),
        }
    }

    /// Load an exported MLP model and its label encoder.
    pub fn load(model_path: &Path, encoder_path: &Path) -> Result<Self> {
        let model = MlpClassifier::from_path(model_path)?;
        let encoder = LabelEncoder::from_path(encoder_path)?;
        tracing::info!(
            model = %model_path.display(),
            inputs = model.input_len(),
            classes = encoder.len(),
            "classifier loaded"
        );
        Ok(Self::new(model, encoder))
    }

    /// Predict the species for the given inputs.
    ///
    /// Features without an input take the front-end's defaults: the
    /// midpoint of a numeric range, or the first value of a list.
    pub fn classify(
        &self,
        domains: &[(Feature, ValueSetting)],
        inputs: &BTreeMap<String, FeatureValue>,
    ) -> Result<String> {
        let vector = build_vector(domains, inputs)?;
        let encoded = self.classifier.predict(&vector)?;
        let species = self.decoder.decode(encoded)?;
        tracing::info!(encoded, species = %species, "species predicted");
        Ok(species)
    }
}

/// Encode inputs as the classifier's feature vector.
///
/// Fails with [`Error::EmptyEnumValues`] if any enumerable feature has no
/// values, before a model is ever involved.
pub fn build_vector(
    domains: &[(Feature, ValueSetting)],
    inputs: &BTreeMap<String, FeatureValue>,
) -> Result<Vec<f64>> {
    if let Some((feature, _)) = domains
        .iter()
        .find(|(_, s)| s.enum_values().is_some_and(<[String]>::is_empty))
    {
        tracing::warn!(label = %feature.label, "classification blocked: empty value list");
        return Err(Error::EmptyEnumValues {
            label: feature.label.clone(),
        });
    }

    domains
        .iter()
        .map(|(feature, setting)| {
            let input = inputs.get(&feature.code);
            let out_of_domain = |value: &FeatureValue| Error::OutOfDomain {
                label: feature.label.clone(),
                value: value.to_string(),
            };
            match setting {
                ValueSetting::Range { min, max } => match input {
                    None => Ok((i128::from(*min) + i128::from(*max)).div_euclid(2) as f64),
                    Some(value) => match value.as_number() {
                        Some(n) if (*min..=*max).contains(&n) => Ok(n as f64),
                        _ => Err(out_of_domain(value)),
                    },
                },
                ValueSetting::Enum { values } => match input {
                    None => Ok(0.0),
                    Some(value) => {
                        let label = value.to_string();
                        values
                            .iter()
                            .position(|v| *v == label)
                            .map(|i| i as f64)
                            .ok_or_else(|| out_of_domain(value))
                    }
                },
            }
        })
        .collect()
}
