use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Classifier, LabelDecoder};
use crate::error::{Error, Result};

/// Hidden-layer activation of an exported multilayer perceptron.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Logistic,
    Identity,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Relu => x.max(0.0),
            Self::Tanh => x.tanh(),
            Self::Logistic => 1.0 / (1.0 + (-x).exp()),
            Self::Identity => x,
        }
    }
}

/// A fully connected layer. `weights[i][j]` links input `i` to output `j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
}

impl DenseLayer {
    fn forward(&self, input: &[f64]) -> Vec<f64> {
        let mut out = self.biases.clone();
        for (x, row) in input.iter().zip(&self.weights) {
            for (o, w) in out.iter_mut().zip(row) {
                *o += x * w;
            }
        }
        out
    }
}

/// Feed-forward classifier exported from a trained MLP as JSON.
///
/// ```json
/// {
///   "activation": "relu",
///   "layers": [{"weights": [[0.1, -0.2]], "biases": [0.0, 0.5]}],
///   "classes": [0, 1]
/// }
/// ```
///
/// Hidden layers use `activation`; the output layer is read raw. A single
/// output unit is a binary decision at zero, otherwise the largest output
/// wins. `classes` maps output positions to encoded labels and defaults to
/// the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpClassifier {
    #[serde(default)]
    pub activation: Activation,
    pub layers: Vec<DenseLayer>,
    #[serde(default)]
    pub classes: Option<Vec<usize>>,
}

impl MlpClassifier {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&content)?;
        model.validate()?;
        Ok(model)
    }

    /// Check that layer shapes chain together.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.layers.first() else {
            return Err(Error::Inference("model has no layers".into()));
        };
        let mut fan_in = first.weights.len();
        for (n, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != fan_in {
                return Err(Error::Inference(format!(
                    "layer {} expects {} inputs, previous layer produces {}",
                    n,
                    layer.weights.len(),
                    fan_in
                )));
            }
            if layer.weights.iter().any(|row| row.len() != layer.biases.len()) {
                return Err(Error::Inference(format!(
                    "layer {} weight rows do not match its {} biases",
                    n,
                    layer.biases.len()
                )));
            }
            fan_in = layer.biases.len();
        }
        if let Some(classes) = &self.classes {
            let outputs = if fan_in == 1 { 2 } else { fan_in };
            if classes.len() != outputs {
                return Err(Error::Inference(format!(
                    "model has {} outputs but {} classes",
                    outputs,
                    classes.len()
                )));
            }
        }
        Ok(())
    }

    pub fn input_len(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weights.len())
    }
}

impl Classifier for MlpClassifier {
    fn predict(&self, features: &[f64]) -> Result<usize> {
        if features.len() != self.input_len() {
            return Err(Error::FeatureCountMismatch {
                expected: self.input_len(),
                actual: features.len(),
            });
        }

        let last = self.layers.len() - 1;
        let mut signal = features.to_vec();
        for (n, layer) in self.layers.iter().enumerate() {
            signal = layer.forward(&signal);
            if n < last {
                signal.iter_mut().for_each(|x| *x = self.activation.apply(*x));
            }
        }

        let position = match signal.as_slice() {
            [single] => usize::from(*single > 0.0),
            outputs => outputs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .ok_or_else(|| Error::Inference("model produced no outputs".into()))?,
        };

        match &self.classes {
            Some(classes) => classes
                .get(position)
                .copied()
                .ok_or_else(|| Error::Inference(format!("no class for output {}", position))),
            None => Ok(position),
        }
    }
}

/// Species names indexed by their encoded label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl LabelDecoder for LabelEncoder {
    fn decode(&self, encoded: usize) -> Result<String> {
        self.classes
            .get(encoded)
            .cloned()
            .ok_or_else(|| Error::Inference(format!("unknown encoded label {}", encoded)))
    }
}
