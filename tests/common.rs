#![allow(dead_code)]
use maxconf::dataset::{Batch, Dataset, DatasetSpec, InMemoryDataset, WhichSet};
use maxconf::dnn::{Dense, DNN};
use maxconf::error::{ReportError, Result};
use maxconf::model::Classifier;
use maxconf::tensorshape::TensorShape;
use maxconf::MCFloat;
use ndarray::{Array1, Array2, ArrayD, IxDyn};
use std::cell::Cell;
use std::ops::Range;
use std::path::PathBuf;

pub fn linear_dnn(weights: Array2<MCFloat>, bias: Array1<MCFloat>) -> DNN {
    let input_size = weights.ncols();
    DNN::from_dense(
        TensorShape::from(vec![input_size]),
        vec![Dense::from_parts(weights, bias)],
    )
}

/// `[0, 1]` data with base budgets given directly
pub fn unit_spec(input_size: usize, base_eps: MCFloat, base_eps_iter: MCFloat) -> DatasetSpec {
    DatasetSpec {
        dir: PathBuf::from("data"),
        input_shape: vec![input_size],
        max_val: 1.,
        center: false,
        base_eps,
        base_eps_iter,
    }
}

/// The same examples in both splits
pub fn in_memory(inputs: Vec<Vec<f32>>, labels: Vec<usize>) -> InMemoryDataset {
    let width = inputs[0].len();
    let n = inputs.len();
    let flat: Vec<f32> = inputs.into_iter().flatten().collect();
    let inputs = ArrayD::from_shape_vec(IxDyn(&[n, width]), flat).unwrap();
    let labels = Array1::from(labels);
    InMemoryDataset::new((inputs.clone(), labels.clone()), (inputs, labels)).unwrap()
}

/// Deterministic pseudo-random examples in `[0, 1]`
pub fn scattered(n: usize, width: usize, classes: usize) -> InMemoryDataset {
    let inputs = (0..n)
        .map(|i| {
            (0..width)
                .map(|j| ((i * 37 + j * 11 + 5) % 17) as f32 / 16.)
                .collect()
        })
        .collect();
    in_memory(inputs, (0..n).map(|i| (i * 7) % classes).collect())
}

/// Counts every forward and backward pass through the wrapped model
pub struct CountingClassifier<'a> {
    pub inner: &'a dyn Classifier,
    pub logit_calls: Cell<usize>,
    pub gradient_calls: Cell<usize>,
}

impl<'a> CountingClassifier<'a> {
    pub fn new(inner: &'a dyn Classifier) -> Self {
        Self {
            inner,
            logit_calls: Cell::new(0),
            gradient_calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.logit_calls.get() + self.gradient_calls.get()
    }
}

impl Classifier for CountingClassifier<'_> {
    fn input_shape(&self) -> TensorShape {
        self.inner.input_shape()
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn logits(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat> {
        self.logit_calls.set(self.logit_calls.get() + 1);
        self.inner.logits(inputs)
    }

    fn input_gradient(
        &self,
        inputs: &Array2<MCFloat>,
        grad_logits: &Array2<MCFloat>,
    ) -> Array2<MCFloat> {
        self.gradient_calls.set(self.gradient_calls.get() + 1);
        self.inner.input_gradient(inputs, grad_logits)
    }
}

/// Serves `budget` batches, then fails as if the process had been killed
pub struct InterruptedDataset<'a> {
    pub inner: &'a dyn Dataset,
    pub budget: Cell<usize>,
}

impl Dataset for InterruptedDataset<'_> {
    fn len(&self, which_set: WhichSet) -> Result<usize> {
        self.inner.len(which_set)
    }

    fn batch(&self, which_set: WhichSet, range: Range<usize>) -> Result<Batch> {
        if self.budget.get() == 0 {
            return Err(ReportError::DatasetLoad("interrupted".to_string()));
        }
        self.budget.set(self.budget.get() - 1);
        self.inner.batch(which_set, range)
    }
}
