use crate::dnn::{Dense, Layer, ReLU};
use crate::error::{ReportError, Result};
use crate::model::Classifier;
use crate::tensorshape::TensorShape;
use crate::MCFloat;
use log::trace;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential feed-forward network producing logits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DNN {
    input_shape: TensorShape,
    layers: Vec<Box<dyn Layer>>,
}

impl DNN {
    pub fn new(input_shape: TensorShape, layers: Vec<Box<dyn Layer>>) -> Self {
        Self {
            input_shape,
            layers,
        }
    }

    /// Dense layers with a ReLU between each pair
    pub fn from_dense(input_shape: TensorShape, dense: Vec<Dense>) -> Self {
        let n = dense.len();
        let mut layers: Vec<Box<dyn Layer>> = vec![];
        for (i, layer) in dense.into_iter().enumerate() {
            let out = layer.output_dim();
            layers.push(Box::new(layer));
            if i + 1 < n {
                layers.push(Box::new(ReLU::new(out)));
            }
        }
        Self::new(input_shape, layers)
    }

    pub fn add_layer(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    pub fn get_layer(&self, idx: usize) -> Option<&dyn Layer> {
        self.layers.get(idx).map(|l| l.as_ref())
    }

    pub fn get_layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn input_dim(&self) -> Option<usize> {
        self.input_shape.dims()
    }

    /// Check that consecutive layers agree on their dimensions.
    ///
    /// # Errors
    /// If the input shape is not fully defined, a layer's own parameters
    /// disagree, or two layers disagree
    pub fn validate(&self) -> Result<()> {
        let mut dim = self.input_dim().ok_or_else(|| {
            ReportError::InvalidConfig(format!(
                "network input shape {} must be fully defined",
                self.input_shape
            ))
        })?;
        if self.layers.is_empty() {
            return Err(ReportError::InvalidConfig(
                "network has no layers".to_string(),
            ));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if !layer.is_consistent() {
                return Err(ReportError::InvalidConfig(format!(
                    "layer {} ({}) has inconsistent parameters",
                    i, layer
                )));
            }
            if layer.input_dim() != dim {
                return Err(ReportError::Shape {
                    expected: vec![dim],
                    given: vec![layer.input_dim()],
                });
            }
            dim = layer.output_dim();
        }
        Ok(())
    }

    /// Returns the input to every layer followed by the final output
    fn forward_trace(&self, input: &Array2<MCFloat>) -> Vec<Array2<MCFloat>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        let mut x = input.clone();
        for layer in &self.layers {
            let next = layer.forward2(&x);
            activations.push(x);
            x = next;
        }
        activations.push(x);
        activations
    }

    pub fn forward2(&self, input: &Array2<MCFloat>) -> Array2<MCFloat> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward2(&x))
    }

    /// Gradient w.r.t. the network input of `<output, grad_output>`
    pub fn backward2(
        &self,
        input: &Array2<MCFloat>,
        grad_output: &Array2<MCFloat>,
    ) -> Array2<MCFloat> {
        let activations = self.forward_trace(input);
        self.layers
            .iter()
            .zip(activations.iter())
            .rev()
            .fold(grad_output.clone(), |grad, (layer, layer_input)| {
                trace!("backward through {}", layer);
                layer.backward2(layer_input, &grad)
            })
    }
}

impl Classifier for DNN {
    fn input_shape(&self) -> TensorShape {
        self.input_shape.clone()
    }

    fn num_classes(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_dim())
    }

    fn logits(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat> {
        self.forward2(inputs)
    }

    fn input_gradient(
        &self,
        inputs: &Array2<MCFloat>,
        grad_logits: &Array2<MCFloat>,
    ) -> Array2<MCFloat> {
        self.backward2(inputs, grad_logits)
    }
}

impl fmt::Display for DNN {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let layers: Vec<String> = self.layers.iter().map(|x| format!("{}", x)).collect();
        write!(f, "Input {} => {}", self.input_shape, layers.join(" => "))
    }
}
