//! Fixed, non-adversarial input corruptions for the `semantic` source.
use crate::dataset::DatasetSpec;
use crate::MCFloat;
use ndarray::Array2;
use std::fmt::Debug;

pub trait InputTransform: Debug {
    fn name(&self) -> &str;

    /// Applied to model-space inputs, `(batch, features)`
    fn apply(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat>;
}

/// Photographic negative: `max_val - x`, or `-x` for centered data
#[derive(Clone, Debug, PartialEq)]
pub struct Negative {
    center: bool,
    max_val: MCFloat,
}

impl Negative {
    pub const fn new(center: bool, max_val: MCFloat) -> Self {
        Self { center, max_val }
    }

    pub fn for_dataset(spec: &DatasetSpec) -> Self {
        Self::new(spec.center, spec.max_val)
    }
}

impl InputTransform for Negative {
    fn name(&self) -> &str {
        "negative"
    }

    fn apply(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat> {
        if self.center {
            inputs.mapv(|x| -x)
        } else {
            inputs.mapv(|x| self.max_val - x)
        }
    }
}
