use crate::MCFloat;
use dyn_clone::DynClone;
use ndarray::Array2;
use std::fmt::{Debug, Display};

/// A differentiable layer acting on `(batch, features)` arrays.
///
/// Layers are stateless: identical inputs give identical outputs.
#[typetag::serde(tag = "type")]
pub trait Layer: DynClone + Display + Debug {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;

    fn forward2(&self, input: &Array2<MCFloat>) -> Array2<MCFloat>;

    /// Vector-Jacobian product with respect to the layer input.
    ///
    /// # Arguments
    ///
    /// * `input` - The input the layer saw on the forward pass
    /// * `grad_output` - Gradient of a scalar loss w.r.t. the layer output
    fn backward2(&self, input: &Array2<MCFloat>, grad_output: &Array2<MCFloat>)
        -> Array2<MCFloat>;

    /// Whether the layer's parameters agree with each other. Deserialized
    /// layers are not checked on construction.
    fn is_consistent(&self) -> bool {
        true
    }

    fn is_activation(&self) -> bool {
        // This should be implemented in activation layers to return true
        false
    }
}

// This implements `Clone` for the trait
dyn_clone::clone_trait_object!(Layer);
