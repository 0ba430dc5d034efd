//! Projected gradient descent under an L∞ budget.
//!
//! ## Algorithm
//!
//! 1. **Initialization**: start at the clean input, optionally offset by
//!    uniform noise in `[-eps, eps]`
//! 2. **Gradient**: cross-entropy w.r.t. the goal label, pulled back through
//!    the classifier to the input
//! 3. **Step**: `eps_iter * sign(gradient)`, descending toward a target or
//!    ascending away from the true label
//! 4. **Projection**: into the L∞ ball around the clean input, then into
//!    `[clip_min, clip_max]`
//! 5. **Repeat** for `nb_iter` steps. Every row runs every step.
//!
//! A classifier with masked or vanishing gradients leaves rows where they
//! started and the attack silently underestimates the error rate. Such rows
//! are counted in [`AttackOutcome::vanished_rows`].
use crate::bounds::Bounds2;
use crate::error::{ReportError, Result};
use crate::model::Classifier;
use crate::util::{one_hot, sign};
use crate::MCFloat;
use log::trace;
use ndarray::{Array1, Array2, Axis, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for a PGD attack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PgdParams {
    /// Radius of the L∞ ball.
    pub eps: MCFloat,
    /// Step size per iteration.
    pub eps_iter: MCFloat,
    /// Number of gradient steps.
    pub nb_iter: usize,
    pub clip_min: MCFloat,
    pub clip_max: MCFloat,
    /// Start from a uniformly random point of the ball.
    pub rand_init: bool,
}

impl PgdParams {
    /// Scale reference budgets, given for data in `[0, 1]`, to the data's
    /// actual range so `eps_iter / eps` stays `base_eps_iter / base_eps`.
    pub fn scaled(
        base_eps: MCFloat,
        base_eps_iter: MCFloat,
        clip_min: MCFloat,
        clip_max: MCFloat,
        nb_iter: usize,
        rand_init: bool,
    ) -> Self {
        let value_range = clip_max - clip_min;
        Self {
            eps: base_eps * value_range,
            eps_iter: base_eps_iter * value_range,
            nb_iter,
            clip_min,
            clip_max,
            rand_init,
        }
    }

    /// # Errors
    pub fn validate(&self) -> Result<()> {
        if !(self.eps >= 0. && self.eps_iter >= 0.) {
            return Err(ReportError::InvalidConfig(format!(
                "eps ({}) and eps_iter ({}) must be non-negative",
                self.eps, self.eps_iter
            )));
        }
        if !(self.clip_min <= self.clip_max) {
            return Err(ReportError::InvalidConfig(format!(
                "clip_min ({}) exceeds clip_max ({})",
                self.clip_min, self.clip_max
            )));
        }
        if self.nb_iter == 0 {
            return Err(ReportError::InvalidConfig(
                "nb_iter must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What each row of the batch is pushed toward
#[derive(Clone, Debug, PartialEq)]
pub enum AttackGoal {
    /// Minimise cross-entropy toward these labels
    Targeted(Array1<usize>),
    /// Maximise cross-entropy of these (true) labels
    Untargeted(Array1<usize>),
}

impl AttackGoal {
    pub fn labels(&self) -> &Array1<usize> {
        match self {
            Self::Targeted(y) | Self::Untargeted(y) => y,
        }
    }

    fn direction(&self) -> MCFloat {
        match self {
            Self::Targeted(_) => -1.,
            Self::Untargeted(_) => 1.,
        }
    }
}

/// Result of one attack run over a batch.
#[derive(Clone, Debug)]
pub struct AttackOutcome {
    /// Same shape as the clean batch
    pub adversarial: Array2<MCFloat>,
    /// Rows that hit a NaN/Inf gradient, or stepped to a point with NaN/Inf
    /// logits, at least once. Those steps were undone, leaving the row at its
    /// last finite iterate.
    pub nonfinite: Vec<bool>,
    /// Rows whose gradient was exactly zero on every step
    pub vanished: Vec<bool>,
}

impl AttackOutcome {
    pub fn nonfinite_rows(&self) -> usize {
        self.nonfinite.iter().filter(|&&b| b).count()
    }

    pub fn vanished_rows(&self) -> usize {
        self.vanished.iter().filter(|&&b| b).count()
    }
}

#[derive(Clone, Debug)]
pub struct ProjectedGradientDescent {
    params: PgdParams,
}

impl ProjectedGradientDescent {
    pub const fn new(params: PgdParams) -> Self {
        Self { params }
    }

    pub const fn params(&self) -> &PgdParams {
        &self.params
    }

    /// Gradient of the cross-entropy between the model's prediction and
    /// `onehot` w.r.t. the inputs.
    fn loss_gradient(
        classifier: &dyn Classifier,
        x: &Array2<MCFloat>,
        onehot: &Array2<MCFloat>,
    ) -> Array2<MCFloat> {
        let grad_logits = classifier.predict_proba(x) - onehot;
        classifier.input_gradient(x, &grad_logits)
    }

    /// Return rows whose logits are no longer finite to `prev` and flag them.
    fn roll_back_nonfinite(
        classifier: &dyn Classifier,
        x: &mut Array2<MCFloat>,
        prev: &Array2<MCFloat>,
        nonfinite: &mut [bool],
    ) {
        let logits = classifier.logits(x);
        for (i, row) in logits.axis_iter(Axis(0)).enumerate() {
            if row.iter().any(|v| !v.is_finite()) {
                x.row_mut(i).assign(&prev.row(i));
                nonfinite[i] = true;
            }
        }
    }

    fn project(&self, ball: &Bounds2, x: &mut Array2<MCFloat>) {
        ball.clamp(&mut x.view_mut());
        let (lo, hi) = (self.params.clip_min, self.params.clip_max);
        x.mapv_inplace(|v| v.max(lo).min(hi));
    }

    /// Run the attack on `x0`, a `(batch, features)` array in model space.
    ///
    /// # Errors
    /// If the goal does not have one label per row or names a class the
    /// classifier does not have
    pub fn perturb<R: Rng + ?Sized>(
        &self,
        classifier: &dyn Classifier,
        x0: &Array2<MCFloat>,
        goal: &AttackGoal,
        rng: &mut R,
    ) -> Result<AttackOutcome> {
        let labels = goal.labels();
        if labels.len() != x0.nrows() {
            return Err(ReportError::Shape {
                expected: vec![x0.nrows()],
                given: vec![labels.len()],
            });
        }
        let num_classes = classifier.num_classes();
        if let Some(&bad) = labels.iter().find(|&&y| y >= num_classes) {
            return Err(ReportError::InvalidConfig(format!(
                "label {} out of range for {} classes",
                bad, num_classes
            )));
        }

        let PgdParams {
            eps,
            eps_iter,
            nb_iter,
            rand_init,
            ..
        } = self.params;
        let ball = Bounds2::linf_ball(x0.view(), eps);
        let mut x = x0.clone();
        let mut nonfinite = vec![false; x.nrows()];
        if rand_init && eps > 0. {
            x += &Array2::random_using(x0.raw_dim(), Uniform::new_inclusive(-eps, eps), rng);
            self.project(&ball, &mut x);
            Self::roll_back_nonfinite(classifier, &mut x, x0, &mut nonfinite);
        }

        let onehot = one_hot(labels, num_classes);
        let step = goal.direction() * eps_iter;
        let mut informative = vec![false; x.nrows()];
        for iter in 0..nb_iter {
            let prev = x.clone();
            let grad = Self::loss_gradient(classifier, &x, &onehot);
            for (i, (mut row, grad_row)) in x
                .axis_iter_mut(Axis(0))
                .zip(grad.axis_iter(Axis(0)))
                .enumerate()
            {
                if grad_row.iter().any(|g| !g.is_finite()) {
                    nonfinite[i] = true;
                    continue;
                }
                if grad_row.iter().any(|&g| g != 0.) {
                    informative[i] = true;
                }
                Zip::from(&mut row)
                    .and(&grad_row)
                    .for_each(|x, &g| *x += step * sign(g));
            }
            self.project(&ball, &mut x);
            Self::roll_back_nonfinite(classifier, &mut x, &prev, &mut nonfinite);
            trace!("pgd iter {} of {}", iter + 1, nb_iter);
        }

        Ok(AttackOutcome {
            adversarial: x,
            nonfinite,
            vanished: informative.into_iter().map(|b| !b).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds2;
    use crate::tensorshape::TensorShape;
    use crate::test_util::*;
    use ndarray::{arr1, arr2};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(eps: MCFloat, eps_iter: MCFloat, nb_iter: usize, rand_init: bool) -> PgdParams {
        PgdParams {
            eps,
            eps_iter,
            nb_iter,
            clip_min: 0.,
            clip_max: 1.,
            rand_init,
        }
    }

    #[test]
    fn test_scaled_keeps_ratio() {
        let p = PgdParams::scaled(0.3, 0.1, -1., 1., 40, true);
        assert!((p.eps - 0.6).abs() < 1e-12);
        assert!((p.eps_iter - 0.2).abs() < 1e-12);
        assert!((p.eps_iter / p.eps - 0.1 / 0.3).abs() < 1e-12);
        assert!(p.validate().is_ok());
        assert!(params(0.1, 0.1, 0, false).validate().is_err());
        assert!(params(-0.1, 0.1, 1, false).validate().is_err());
    }

    #[test]
    fn test_single_targeted_step_on_linear_model() {
        // logits = x0 - x1, x1 - x0, 0
        let model = linear_classifier(arr2(&[[1., -1.], [-1., 1.], [0., 0.]]), arr1(&[0., 0., 0.]));
        let attack = ProjectedGradientDescent::new(params(0.1, 0.05, 1, false));
        let x0 = arr2(&[[0.5, 0.5]]);
        let mut rng = StdRng::seed_from_u64(0);
        let out = attack
            .perturb(&model, &x0, &AttackGoal::Targeted(arr1(&[1])), &mut rng)
            .unwrap();
        // Moving toward class 1 lowers x0 and raises x1
        assert!((out.adversarial[[0, 0]] - 0.45).abs() < 1e-12);
        assert!((out.adversarial[[0, 1]] - 0.55).abs() < 1e-12);
        assert_eq!(out.nonfinite_rows(), 0);
        assert_eq!(out.vanished_rows(), 0);
    }

    #[test]
    fn test_untargeted_raises_loss() {
        let model = linear_classifier(arr2(&[[2., -1.], [-1., 2.]]), arr1(&[0., 0.]));
        let attack = ProjectedGradientDescent::new(params(0.2, 0.05, 10, false));
        let x0 = arr2(&[[0.6, 0.4], [0.2, 0.9]]);
        let labels = arr1(&[0, 1]);
        let mut rng = StdRng::seed_from_u64(1);
        let out = attack
            .perturb(&model, &x0, &AttackGoal::Untargeted(labels.clone()), &mut rng)
            .unwrap();
        let before = model.predict_proba(&x0);
        let after = model.predict_proba(&out.adversarial);
        for (i, &y) in labels.iter().enumerate() {
            assert!(after[[i, y]] < before[[i, y]]);
        }
    }

    #[test]
    fn test_zero_gradient_rows_are_reported() {
        let model = linear_classifier(Array2::zeros((3, 2)), arr1(&[0., 1., 0.]));
        let attack = ProjectedGradientDescent::new(params(0.1, 0.05, 5, false));
        let x0 = arr2(&[[0.1, 0.2], [0.3, 0.4]]);
        let mut rng = StdRng::seed_from_u64(2);
        let out = attack
            .perturb(&model, &x0, &AttackGoal::Targeted(arr1(&[0, 2])), &mut rng)
            .unwrap();
        assert_eq!(out.vanished_rows(), 2);
        assert_eq!(out.adversarial, x0);
    }

    #[derive(Debug)]
    struct PoisonedRow {
        inner: crate::dnn::DNN,
    }

    impl Classifier for PoisonedRow {
        fn input_shape(&self) -> TensorShape {
            self.inner.input_shape()
        }

        fn num_classes(&self) -> usize {
            self.inner.num_classes()
        }

        fn logits(&self, inputs: &Array2<MCFloat>) -> Array2<MCFloat> {
            self.inner.logits(inputs)
        }

        fn input_gradient(
            &self,
            inputs: &Array2<MCFloat>,
            grad_logits: &Array2<MCFloat>,
        ) -> Array2<MCFloat> {
            let mut grad = self.inner.input_gradient(inputs, grad_logits);
            grad[[0, 0]] = MCFloat::NAN;
            grad
        }
    }

    #[test]
    fn test_nonfinite_gradient_keeps_last_valid_row() {
        let model = PoisonedRow {
            inner: linear_classifier(arr2(&[[1., -1.], [-1., 1.]]), arr1(&[0., 0.])),
        };
        let attack = ProjectedGradientDescent::new(params(0.1, 0.05, 3, false));
        let x0 = arr2(&[[0.5, 0.5], [0.5, 0.5]]);
        let mut rng = StdRng::seed_from_u64(3);
        let out = attack
            .perturb(&model, &x0, &AttackGoal::Targeted(arr1(&[1, 1])), &mut rng)
            .unwrap();
        assert_eq!(out.nonfinite_rows(), 1);
        assert_eq!(out.adversarial.row(0), x0.row(0));
        assert_ne!(out.adversarial.row(1), x0.row(1));
    }

    #[test]
    fn test_step_into_nan_region_is_undone() {
        let model = NanBelow {
            inner: linear_classifier(arr2(&[[1., -1.], [-1., 1.]]), arr1(&[0., 0.])),
            threshold: 0.45,
        };
        let attack = ProjectedGradientDescent::new(params(0.2, 0.1, 2, false));
        let x0 = arr2(&[[0.5, 0.5], [0.9, 0.1]]);
        let mut rng = StdRng::seed_from_u64(5);
        let out = attack
            .perturb(&model, &x0, &AttackGoal::Targeted(arr1(&[1, 1])), &mut rng)
            .unwrap();
        // Row 0 would step to x0 = 0.4 where the logits are NaN
        assert_eq!(out.adversarial.row(0), x0.row(0));
        assert!(out.nonfinite[0]);
        assert!(!out.nonfinite[1]);
        assert!((out.adversarial[[1, 0]] - 0.7).abs() < 1e-12);
        assert!(model.logits(&out.adversarial).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_goal_must_match_batch() {
        let model = linear_classifier(arr2(&[[1., 0.], [0., 1.]]), arr1(&[0., 0.]));
        let attack = ProjectedGradientDescent::new(params(0.1, 0.05, 1, false));
        let x0 = arr2(&[[0.5, 0.5]]);
        let mut rng = StdRng::seed_from_u64(4);
        assert!(attack
            .perturb(&model, &x0, &AttackGoal::Targeted(arr1(&[0, 1])), &mut rng)
            .is_err());
        assert!(attack
            .perturb(&model, &x0, &AttackGoal::Targeted(arr1(&[2])), &mut rng)
            .is_err());
    }

    proptest! {
        #[test]
        fn test_output_in_ball_and_clip_range(
            dnn in fc_dnn(4, 3, 1, 5),
            x0 in unit_array2(3, 4),
            target in 0_usize..3,
            eps in 0.0..0.5,
            nb_iter in 1_usize..6,
            seed in any::<u64>(),
        ) {
            let attack = ProjectedGradientDescent::new(PgdParams {
                eps,
                eps_iter: eps / 3.,
                nb_iter,
                clip_min: 0.,
                clip_max: 1.,
                rand_init: true,
            });
            let mut rng = StdRng::seed_from_u64(seed);
            let goal = AttackGoal::Targeted(Array1::from_elem(3, target));
            let out = attack.perturb(&dnn, &x0, &goal, &mut rng).unwrap();
            let ball = Bounds2::linf_ball(x0.view(), eps);
            prop_assert!(ball.is_member(&out.adversarial.view()));
            prop_assert!(out.adversarial.iter().all(|&v| (0. ..=1.).contains(&v)));
            prop_assert_eq!(out.adversarial.shape(), x0.shape());
        }

        #[test]
        fn test_same_seed_same_result(dnn in fc_dnn(4, 3, 1, 5), x0 in unit_array2(2, 4), seed in any::<u64>()) {
            let attack = ProjectedGradientDescent::new(params(0.3, 0.1, 3, true));
            let goal = AttackGoal::Untargeted(arr1(&[0, 1]));
            let a = attack.perturb(&dnn, &x0, &goal, &mut StdRng::seed_from_u64(seed)).unwrap();
            let b = attack.perturb(&dnn, &x0, &goal, &mut StdRng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(a.adversarial, b.adversarial);
        }
    }
}
