#![cfg(test)]
use crate::affine::Affine2;
use crate::dnn::{Dense, DNN};
use crate::model::Classifier;
use crate::tensorshape::TensorShape;
use crate::MCFloat;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(len..=len))) -> Array1<f64> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn array2(rows: usize, cols: usize)(v in Vec::lift1_with(array1(cols), SizeRange::new(rows..=rows))) -> Array2<f64> {
        assert!(rows > 0);
        ndarray::stack(Axis(0), &v.iter().map(|x| x.view()).collect::<Vec<ArrayView1<f64>>>()).unwrap()
    }
}

prop_compose! {
    /// Inputs in `[0, 1]`, like normalised pixels
    pub fn unit_array2(rows: usize, cols: usize)(v in Vec::lift1_with(0. ..=1., SizeRange::new(rows * cols..=rows * cols))) -> Array2<f64> {
        Array2::from_shape_vec((rows, cols), v).unwrap()
    }
}

prop_compose! {
    pub fn affine2(in_dim: usize, out_dim: usize)(basis in array2(out_dim, in_dim), shift in array1(out_dim)) -> Affine2 {
        Affine2::new(basis, shift)
    }
}

prop_compose! {
    pub fn fc_dnn(input_size: usize, output_size: usize, nlayers: usize, max_layer_width: usize)(repr_sizes in Vec::lift1_with(1..max_layer_width, SizeRange::new(nlayers..=nlayers)).prop_map(move |mut x| {x.insert(0, input_size); x.push(output_size); x}))(affines in {let pairs = repr_sizes.iter().zip(repr_sizes.iter().skip(1)); pairs.map(|(&x, &y)| affine2(x,y)).collect::<Vec<_>>()}) -> DNN {
        DNN::from_dense(
            TensorShape::from(vec![input_size]),
            affines.into_iter().map(Dense::new).collect(),
        )
    }
}

/// Single dense layer `logits = W x + b`
pub fn linear_classifier(weights: Array2<MCFloat>, bias: Array1<MCFloat>) -> DNN {
    let input_size = weights.ncols();
    DNN::from_dense(
        TensorShape::from(vec![input_size]),
        vec![Dense::from_parts(weights, bias)],
    )
}

pub fn max_abs_diff(a: &ArrayView1<MCFloat>, b: &ArrayView1<MCFloat>) -> MCFloat {
    (a - b).fold(0., |m: MCFloat, &v| m.max(v.abs()))
}

/// Wraps a model so rows with `x[0] < threshold` get NaN logits and gradients
#[derive(Debug)]
pub struct NanBelow {
    pub inner: DNN,
    pub threshold: MCFloat,
}

impl NanBelow {
    fn poison(&self, inputs: &Array2<MCFloat>, mut out: Array2<MCFloat>) -> Array2<MCFloat> {
        for (x, mut row) in inputs.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
            if x[0] < self.threshold {
                row.fill(MCFloat::NAN);
            }
        }
        out
    }
}

impl Classifier for NanBelow {
    fn input_shape(&self) -> TensorShape {
        self.inner.input_shape()
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn logits(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat> {
        self.poison(inputs, self.inner.logits(inputs))
    }

    fn input_gradient(
        &self,
        inputs: &Array2<MCFloat>,
        grad_logits: &Array2<MCFloat>,
    ) -> Array2<MCFloat> {
        self.poison(inputs, self.inner.input_gradient(inputs, grad_logits))
    }
}
