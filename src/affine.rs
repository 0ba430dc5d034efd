#![allow(non_snake_case)]
//! Representation of affine transformations
use crate::MCFloat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};

/// Affine map `f(x) = Ax + b` with `A` of shape `(output_dim, input_dim)`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Affine2 {
    basis: Array2<MCFloat>,
    shift: Array1<MCFloat>,
}

impl Display for Affine2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(
            f,
            "Basis {:?} Shift {:?}",
            self.basis.shape(),
            self.shift.shape()
        )
    }
}

impl Affine2 {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(basis: Array2<MCFloat>, shift: Array1<MCFloat>) -> Self {
        debug_assert_eq!(basis.shape()[0], shift.len());
        Self { basis, shift }
    }

    pub fn basis(&self) -> ArrayView2<MCFloat> {
        self.basis.view()
    }

    pub fn shift(&self) -> ArrayView1<MCFloat> {
        self.shift.view()
    }

    pub fn input_dim(&self) -> usize {
        self.basis.shape()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.shift.len()
    }

    /// Whether `basis` and `shift` agree, which deserialized maps may violate.
    pub fn is_consistent(&self) -> bool {
        self.basis.nrows() == self.shift.len()
    }

    pub fn apply(&self, x: &ArrayView1<MCFloat>) -> Array1<MCFloat> {
        self.basis.dot(x) + &self.shift
    }

    /// Apply to a batch laid out as `(batch, input_dim)`
    pub fn apply_matrix(&self, X: &ArrayView2<MCFloat>) -> Array2<MCFloat> {
        X.dot(&self.basis.t()) + &self.shift.view().insert_axis(Axis(0))
    }

    /// Pull a `(batch, output_dim)` cotangent back to `(batch, input_dim)`.
    ///
    /// The shift does not depend on the input so it drops out.
    pub fn apply_transpose(&self, G: &ArrayView2<MCFloat>) -> Array2<MCFloat> {
        G.dot(&self.basis)
    }
}
