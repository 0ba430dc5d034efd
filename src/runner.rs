//! Runs one attack over one batch.
//!
//! Datasets hand out `f32` arrays shaped like the examples; classifiers and
//! attacks work on flat `(batch, features)` arrays of [`MCFloat`]. The runner
//! owns that conversion so neither side needs to know about the other.
use crate::attack::{AttackGoal, AttackOutcome, ProjectedGradientDescent};
use crate::error::{ReportError, Result};
use crate::model::Classifier;
use crate::MCFloat;
use log::warn;
use ndarray::{Array2, ArrayD};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct BatchAttackRunner<'a> {
    classifier: &'a dyn Classifier,
    attack: ProjectedGradientDescent,
}

impl<'a> BatchAttackRunner<'a> {
    pub fn new(classifier: &'a dyn Classifier, attack: ProjectedGradientDescent) -> Self {
        Self { classifier, attack }
    }

    pub fn classifier(&self) -> &'a dyn Classifier {
        self.classifier
    }

    pub const fn attack(&self) -> &ProjectedGradientDescent {
        &self.attack
    }

    /// Check the per-example shape, flatten and cast to model space.
    ///
    /// # Errors
    /// If the example shape does not match the classifier's input shape
    pub fn to_model_space(&self, inputs: &ArrayD<f32>) -> Result<Array2<MCFloat>> {
        to_model_space(self.classifier, inputs)
    }

    /// Run the attack once, seeded by `seed`.
    ///
    /// # Errors
    /// If `x` is not `(batch, input_dim)` or the goal does not fit the batch
    pub fn run(&self, x: &Array2<MCFloat>, goal: &AttackGoal, seed: u64) -> Result<AttackOutcome> {
        let expected = self.classifier.input_shape().dims();
        if expected.map_or(false, |d| d != x.ncols()) {
            return Err(ReportError::Shape {
                expected: vec![x.nrows(), expected.unwrap_or(0)],
                given: x.shape().to_vec(),
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let outcome = self.attack.perturb(self.classifier, x, goal, &mut rng)?;
        if outcome.nonfinite_rows() > 0 {
            warn!(
                "{} of {} rows hit non-finite gradients; kept their last finite iterate",
                outcome.nonfinite_rows(),
                x.nrows()
            );
        }
        Ok(outcome)
    }
}

/// # Errors
/// If the example shape does not match the classifier's input shape
pub fn to_model_space(classifier: &dyn Classifier, inputs: &ArrayD<f32>) -> Result<Array2<MCFloat>> {
    let shape = classifier.input_shape();
    let example_shape: &[usize] = if inputs.ndim() == 0 {
        &[]
    } else {
        &inputs.shape()[1..]
    };
    if inputs.ndim() == 0 || !shape.accepts(example_shape) {
        return Err(ReportError::Shape {
            expected: shape.as_known(),
            given: inputs.shape().to_vec(),
        });
    }
    let n = inputs.shape()[0];
    let width: usize = example_shape.iter().product();
    let flat: Vec<MCFloat> = inputs.iter().map(|&v| MCFloat::from(v)).collect();
    Array2::from_shape_vec((n, width), flat).map_err(|_| ReportError::Shape {
        expected: vec![n, width],
        given: inputs.shape().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::PgdParams;
    use crate::test_util::linear_classifier;
    use ndarray::{arr1, arr2, IxDyn};

    fn runner_params() -> PgdParams {
        PgdParams {
            eps: 0.1,
            eps_iter: 0.05,
            nb_iter: 2,
            clip_min: 0.,
            clip_max: 1.,
            rand_init: true,
        }
    }

    #[test]
    fn test_to_model_space_flattens_in_row_major_order() {
        let model = linear_classifier(Array2::ones((2, 4)), arr1(&[0., 0.]));
        let runner = BatchAttackRunner::new(&model, ProjectedGradientDescent::new(runner_params()));
        let inputs = ArrayD::from_shape_vec(IxDyn(&[2, 4]), vec![0., 1., 2., 3., 4., 5., 6., 7.])
            .unwrap();
        let flat = runner.to_model_space(&inputs).unwrap();
        assert_eq!(flat, arr2(&[[0., 1., 2., 3.], [4., 5., 6., 7.]]));
    }

    #[test]
    fn test_to_model_space_rejects_wrong_shape() {
        let model = linear_classifier(Array2::ones((2, 4)), arr1(&[0., 0.]));
        let inputs = ArrayD::<f32>::zeros(IxDyn(&[2, 3]));
        assert!(matches!(
            to_model_space(&model, &inputs),
            Err(ReportError::Shape { .. })
        ));
    }

    #[test]
    fn test_run_is_seeded() {
        let model = linear_classifier(arr2(&[[1., -1.], [-1., 1.]]), arr1(&[0., 0.]));
        let runner = BatchAttackRunner::new(&model, ProjectedGradientDescent::new(runner_params()));
        let x = arr2(&[[0.5, 0.5], [0.2, 0.8]]);
        let goal = AttackGoal::Targeted(arr1(&[1, 0]));
        let a = runner.run(&x, &goal, 7).unwrap();
        let b = runner.run(&x, &goal, 7).unwrap();
        assert_eq!(a.adversarial, b.adversarial);
        assert!(runner.run(&arr2(&[[0.5, 0.5, 0.5]]), &goal, 7).is_err());
    }
}
