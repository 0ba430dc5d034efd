use crate::affine::Affine2;
use crate::dnn::layer::Layer;
use crate::MCFloat;
use ndarray::Array1;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Dense {
    aff: Affine2,
}

impl Dense {
    pub const fn new(aff: Affine2) -> Self {
        Self { aff }
    }

    pub fn from_parts(mul: Array2<MCFloat>, add: Array1<MCFloat>) -> Self {
        Self {
            aff: Affine2::new(mul, add),
        }
    }

    pub const fn affine(&self) -> &Affine2 {
        &self.aff
    }
}

#[typetag::serde]
impl Layer for Dense {
    fn input_dim(&self) -> usize {
        self.aff.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.aff.output_dim()
    }

    fn forward2(&self, input: &Array2<MCFloat>) -> Array2<MCFloat> {
        self.aff.apply_matrix(&input.view())
    }

    fn backward2(
        &self,
        _input: &Array2<MCFloat>,
        grad_output: &Array2<MCFloat>,
    ) -> Array2<MCFloat> {
        self.aff.apply_transpose(&grad_output.view())
    }

    fn is_consistent(&self) -> bool {
        self.aff.is_consistent()
    }
}

impl fmt::Display for Dense {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dense {}", self.aff.output_dim())
    }
}
