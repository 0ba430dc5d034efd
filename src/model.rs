//! The classifier boundary.
//!
//! Everything downstream sees a model only through [`Classifier`]: batched
//! logits plus the vector-Jacobian product of the logits w.r.t. the inputs.
//! The model is never updated; gradients are taken w.r.t. inputs only.
use crate::dataset::DatasetSpec;
use crate::dnn::DNN;
use crate::error::{ReportError, Result};
use crate::tensorshape::TensorShape;
use crate::util::{argmax_rows, softmax};
use crate::MCFloat;
use log::info;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub trait Classifier {
    /// Shape of one example, without the batch axis
    fn input_shape(&self) -> TensorShape;

    fn num_classes(&self) -> usize;

    /// `(batch, features) -> (batch, classes)`
    fn logits(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat>;

    /// Gradient of `sum(logits(inputs) * grad_logits)` w.r.t. `inputs`
    fn input_gradient(
        &self,
        inputs: &Array2<MCFloat>,
        grad_logits: &Array2<MCFloat>,
    ) -> Array2<MCFloat>;

    fn predict_proba(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat> {
        softmax(&self.logits(inputs).view())
    }

    /// # Errors
    /// If the model produces NaN probabilities
    fn predict(&self, inputs: &Array2<MCFloat>) -> Result<Predictions> {
        Predictions::from_probabilities(&self.predict_proba(inputs))
    }
}

/// Predicted class and its probability for each row of a batch
#[derive(Clone, Debug, PartialEq)]
pub struct Predictions {
    pub classes: Array1<usize>,
    pub confidence: Array1<MCFloat>,
}

impl Predictions {
    /// # Errors
    /// If a row contains NaN
    pub fn from_probabilities(probs: &Array2<MCFloat>) -> Result<Self> {
        let (classes, confidence) = argmax_rows(&probs.view())?;
        Ok(Self {
            classes,
            confidence,
        })
    }

    /// Like [`Predictions::from_probabilities`], but a row with NaN or Inf
    /// is flagged `false` in the returned mask instead of failing the batch.
    /// Flagged rows read as class 0 with confidence 0.
    ///
    /// # Errors
    pub fn from_finite_rows(probs: &Array2<MCFloat>) -> Result<(Self, Vec<bool>)> {
        let finite: Vec<bool> = probs
            .axis_iter(Axis(0))
            .map(|row| row.iter().all(|p| p.is_finite()))
            .collect();
        let mut cleaned = probs.clone();
        for (mut row, &ok) in cleaned.axis_iter_mut(Axis(0)).zip(&finite) {
            if !ok {
                row.fill(0.);
            }
        }
        Ok((Self::from_probabilities(&cleaned)?, finite))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn correctness(&self, labels: &Array1<usize>) -> Vec<bool> {
        self.classes
            .iter()
            .zip(labels.iter())
            .map(|(p, y)| p == y)
            .collect()
    }
}

/// A saved model: the network plus the dataset it was trained on
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelBundle {
    pub network: DNN,
    pub dataset: DatasetSpec,
}

impl ModelBundle {
    /// Load and validate a model file.
    ///
    /// # Errors
    /// `ReportError::ModelLoad` if the file is unreadable, not a model, or
    /// inconsistent with its dataset description
    pub fn load(path: &Path) -> Result<Self> {
        let load_err = |reason: String| ReportError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let contents = fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let bundle: Self = serde_json::from_str(&contents).map_err(|e| load_err(e.to_string()))?;
        bundle
            .network
            .validate()
            .map_err(|e| load_err(e.to_string()))?;
        if !bundle
            .network
            .input_shape()
            .is_compatible_with(&TensorShape::from(bundle.dataset.input_shape.clone()))
        {
            return Err(load_err(format!(
                "network expects {} but dataset provides {:?}",
                bundle.network.input_shape(),
                bundle.dataset.input_shape
            )));
        }
        info!("Loaded model {}", bundle.network);
        Ok(bundle)
    }

    /// # Errors
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
