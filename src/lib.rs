#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]
//! MaxConfidence robustness evaluation.
//!
//! Runs a classifier over clean, semantically perturbed and MaxConfidence
//! adversarial versions of a dataset split and records, per example, whether
//! the model was correct and how confident it was. See [`ReportAggregator`]
//! for the entry point.
//!
//! MaxConfidence results are an upper bound on robustness. A model whose
//! gradients are uninformative (gradient masking) will look robust here
//! without being so; check [`ConfidenceReport::masking_warning`].
extern crate ndarray;
extern crate ndarray_rand;
extern crate ndarray_stats;
extern crate rand;
extern crate shh;

pub mod affine;
pub mod aggregator;
pub mod attack;
pub mod bounds;
pub mod dataset;
pub mod dnn;
pub mod error;
pub mod logging;
pub mod max_confidence;
pub mod model;
pub mod report;
pub mod runner;
pub mod tensorshape;
mod test_util;
pub mod transform;
pub mod util;

pub use crate::aggregator::{ReportAggregator, ReportConfig};
pub use crate::attack::{AttackGoal, PgdParams, ProjectedGradientDescent};
pub use crate::dataset::{Batch, Dataset, WhichSet};
pub use crate::error::{ReportError, Result};
pub use crate::max_confidence::{CandidateClasses, MaxConfidence};
pub use crate::model::Classifier;
pub use crate::report::{ConfidenceReport, ConfidenceReportEntry, ReportStats};
pub use crate::runner::BatchAttackRunner;

pub type MCFloat = f64;
