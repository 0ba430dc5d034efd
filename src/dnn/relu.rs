use crate::dnn::layer::Layer;
use crate::MCFloat;
use ndarray::Array2;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReLU {
    ndims: usize,
}

impl ReLU {
    pub const fn new(ndims: usize) -> Self {
        Self { ndims }
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "ReLU")
    }
}

#[typetag::serde]
impl Layer for ReLU {
    fn input_dim(&self) -> usize {
        self.ndims
    }

    fn output_dim(&self) -> usize {
        self.ndims
    }

    fn forward2(&self, input: &Array2<MCFloat>) -> Array2<MCFloat> {
        input.mapv(|x| if x.lt(&0.) { 0. } else { x })
    }

    /// Subgradient 0 at the kink, matching the forward pass mapping 0 to 0.
    fn backward2(&self, input: &Array2<MCFloat>, grad_output: &Array2<MCFloat>) -> Array2<MCFloat> {
        Zip::from(input)
            .and(grad_output)
            .map_collect(|&x, &g| if x > 0. { g } else { 0. })
    }

    fn is_activation(&self) -> bool {
        true
    }
}
