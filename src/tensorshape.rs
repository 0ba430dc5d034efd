//! Per-example input shapes.
//!
//! Shapes exclude the batch axis. An unknown dimension (`None`) is compatible
//! with any size.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TensorShape {
    dims: Vec<Option<usize>>,
}

impl TensorShape {
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self { dims }
    }

    /// Number of scalars in one example, if every dimension is known.
    pub fn dims(&self) -> Option<usize> {
        self.dims.iter().copied().product()
    }

    pub fn is_compatible_with(&self, other: &Self) -> bool {
        if self.dims.len() != other.dims.len() {
            return false;
        }
        self.dims
            .iter()
            .zip(other.dims.iter())
            .all(|(x, y)| match (x, y) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    /// Whether a concrete example shape (without batch axis) matches.
    pub fn accepts(&self, shape: &[usize]) -> bool {
        self.is_compatible_with(&Self::from(shape.to_vec()))
    }

    pub fn as_known(&self) -> Vec<usize> {
        self.dims.iter().map(|x| x.unwrap_or(0)).collect()
    }
}

impl Index<usize> for TensorShape {
    type Output = Option<usize>;

    fn index(&self, idx: usize) -> &Option<usize> {
        &self.dims[idx]
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(v: Vec<usize>) -> Self {
        Self {
            dims: v.into_iter().map(Some).collect(),
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self
            .dims
            .iter()
            .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
            .collect();
        write!(f, "[{}]", dims.join(", "))
    }
}
