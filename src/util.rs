//! Utility functions
use crate::error::{ReportError, Result};
use crate::MCFloat;
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use ndarray_stats::QuantileExt;

/// Row-wise softmax of a `(batch, classes)` logit matrix
pub fn softmax(logits: &ArrayView2<MCFloat>) -> Array2<MCFloat> {
    let mut out = logits.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(MCFloat::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let total = row.sum();
        row.mapv_inplace(|x| x / total);
    }
    out
}

/// Per-row index and value of the largest entry.
///
/// Ties go to the lowest index.
///
/// # Errors
/// If a row contains NaN
pub fn argmax_rows(x: &ArrayView2<MCFloat>) -> Result<(Array1<usize>, Array1<MCFloat>)> {
    let mut classes = Array1::zeros(x.nrows());
    let mut values = Array1::zeros(x.nrows());
    for ((row, class), value) in x
        .axis_iter(Axis(0))
        .zip(classes.iter_mut())
        .zip(values.iter_mut())
    {
        let idx = row.argmax().map_err(|_| ReportError::NonFinite)?;
        *class = idx;
        *value = row[idx];
    }
    Ok((classes, values))
}

/// Sign with `sign(0) == 0`
pub fn sign(x: MCFloat) -> MCFloat {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}

pub fn one_hot(labels: &Array1<usize>, num_classes: usize) -> Array2<MCFloat> {
    let mut out = Array2::zeros((labels.len(), num_classes));
    Zip::from(out.rows_mut())
        .and(labels)
        .for_each(|mut row, &label| row[label] = 1.);
    out
}
