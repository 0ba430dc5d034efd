#![allow(clippy::module_name_repetitions)]
use crate::MCFloat;
use ndarray::iter::Lanes;
use ndarray::Axis;
use ndarray::Ix3;
use ndarray::RemoveAxis;
use ndarray::Zip;
use ndarray::{stack, Array, Dimension};
use ndarray::{ArrayView, ArrayViewMut};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Box over a `(batch, features)` array
pub type Bounds2 = Bounds<Ix3>;

/// Elementwise lower and upper bounds, stacked along axis 0
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Bounds<D: Dimension> {
    data: Array<MCFloat, D>,
}

impl<D: Dimension + RemoveAxis> Bounds<D> {
    /// # Panics
    /// If `lower` and `upper` have different shapes
    pub fn new<'a, S: Dimension + Dimension<Larger = D>>(
        lower: ArrayView<'a, MCFloat, S>,
        upper: ArrayView<'a, MCFloat, S>,
    ) -> Self {
        let data: Array<MCFloat, D> = stack(Axis(0), &[lower, upper]).unwrap();
        Self { data }
    }

    /// The L∞ ball of radius `eps` around `center`
    pub fn linf_ball<S: Dimension + Dimension<Larger = D>>(
        center: ArrayView<MCFloat, S>,
        eps: MCFloat,
    ) -> Self {
        let lower = center.mapv(|x| x - eps);
        let upper = center.mapv(|x| x + eps);
        Self::new(lower.view(), upper.view())
    }

    pub fn lower(&self) -> ArrayView<MCFloat, D::Smaller> {
        self.data.index_axis(Axis(0), 0)
    }

    pub fn upper(&self) -> ArrayView<MCFloat, D::Smaller> {
        self.data.index_axis(Axis(0), 1)
    }

    pub fn bounds_iter(&self) -> Lanes<MCFloat, D::Smaller> {
        self.data.lanes(Axis(0))
    }

    /// Project `x` onto the box in place
    pub fn clamp(&self, x: &mut ArrayViewMut<MCFloat, D::Smaller>) {
        Zip::from(x)
            .and(self.bounds_iter())
            .for_each(|x, bounds| *x = x.max(bounds[0]).min(bounds[1]));
    }

    pub fn is_member(&self, x: &ArrayView<MCFloat, D::Smaller>) -> bool {
        let eps = 1e-9;
        Zip::from(x)
            .and(self.bounds_iter())
            .all(|&x, bounds| bounds[0] - eps <= x && x <= bounds[1] + eps)
    }
}

impl<D: Dimension + RemoveAxis> Display for Bounds<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "Lower: {}\nUpper: {}", self.lower(), self.upper())
    }
}
