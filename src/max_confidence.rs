//! MaxConfidence: one targeted attack per candidate class, keep the most
//! confident mistake.
//!
//! For each example the clean input and every targeted adversarial candidate
//! are scored by the model. Among candidates the model misclassifies, the one
//! with the highest confidence wins. Candidates are considered clean first,
//! then by ascending target class, and a later candidate only replaces the
//! current best if it is strictly more confident, so ties resolve to the
//! first one seen. An example no candidate fools is reported as correct with
//! its clean confidence.
use crate::attack::AttackGoal;
use crate::error::{ReportError, Result};
use crate::model::Predictions;
use crate::runner::BatchAttackRunner;
use crate::MCFloat;
use itertools::Itertools;
use log::debug;
use ndarray::{Array1, Array2, Axis};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Which target classes to attack for each example
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateClasses {
    /// Every class but the true one
    AllOthers,
    /// The `k` wrong classes the model finds most likely on the clean input
    MostLikely(usize),
}

impl Default for CandidateClasses {
    fn default() -> Self {
        Self::AllOthers
    }
}

impl CandidateClasses {
    /// `(batch, classes)` mask: `true` where the class is attacked for that row
    pub fn mask(&self, clean_probs: &Array2<MCFloat>, labels: &Array1<usize>) -> Array2<bool> {
        let num_classes = clean_probs.ncols();
        let mut mask = Array2::from_elem(clean_probs.raw_dim(), false);
        for ((mut row, probs), &label) in mask
            .axis_iter_mut(Axis(0))
            .zip(clean_probs.axis_iter(Axis(0)))
            .zip(labels.iter())
        {
            let others = (0..num_classes).filter(|&c| c != label);
            match *self {
                Self::AllOthers => others.for_each(|c| row[c] = true),
                Self::MostLikely(k) => others
                    .sorted_by_key(|&c| (Reverse(OrderedFloat(probs[c])), c))
                    .take(k)
                    .for_each(|c| row[c] = true),
            }
        }
        mask
    }
}

/// Per-example outcome of a MaxConfidence attack on one batch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    pub correctness: Vec<bool>,
    pub confidence: Vec<MCFloat>,
    /// Target class of the winning candidate; `None` if the clean input won
    /// or nothing fooled the model
    pub chosen_class: Vec<Option<usize>>,
    /// Rows that saw a non-finite gradient in any attack
    pub nonfinite_rows: usize,
    /// Rows whose gradient vanished in every attack they took part in
    pub vanished_rows: usize,
    /// Number of targeted attacks run over the batch
    pub attack_runs: usize,
}

/// Best candidate so far for one row: `(target class, confidence)`
type Best = Option<(Option<usize>, MCFloat)>;

#[derive(Clone, Debug, Default)]
pub struct MaxConfidence {
    candidates: CandidateClasses,
}

impl MaxConfidence {
    pub const fn new(candidates: CandidateClasses) -> Self {
        Self { candidates }
    }

    pub const fn candidates(&self) -> CandidateClasses {
        self.candidates
    }

    fn consider(
        best: &mut [Best],
        preds: &Predictions,
        labels: &Array1<usize>,
        eligible: impl Fn(usize) -> bool,
        class: Option<usize>,
    ) -> usize {
        let mut fooled = 0;
        for (i, slot) in best.iter_mut().enumerate() {
            if !eligible(i) || preds.classes[i] == labels[i] {
                continue;
            }
            fooled += 1;
            let confidence = preds.confidence[i];
            if slot.map_or(true, |(_, c)| confidence > c) {
                *slot = Some((class, confidence));
            }
        }
        fooled
    }

    /// Attack a batch already in model space.
    ///
    /// `seed` fixes the random starts: the attack targeting class `c` is
    /// seeded with `seed + c`.
    ///
    /// # Errors
    /// If a label is out of range, shapes disagree or the model produces NaN
    /// on the clean batch. Non-finite predictions on an attacked batch only
    /// disqualify those rows.
    pub fn select(
        &self,
        runner: &BatchAttackRunner,
        x: &Array2<MCFloat>,
        labels: &Array1<usize>,
        seed: u64,
    ) -> Result<Selection> {
        let classifier = runner.classifier();
        let n = x.nrows();
        if labels.len() != n {
            return Err(ReportError::Shape {
                expected: vec![n],
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

        let clean_probs = classifier.predict_proba(x);
        let clean = Predictions::from_probabilities(&clean_probs)?;
        let mask = self.candidates.mask(&clean_probs, labels);

        let mut best: Vec<Best> = vec![None; n];
        Self::consider(&mut best, &clean, labels, |_| true, None);

        let mut nonfinite = vec![false; n];
        let mut attacked = vec![false; n];
        let mut informative = vec![false; n];
        let mut attack_runs = 0;
        for class in 0..num_classes {
            let column = mask.index_axis(Axis(1), class);
            if !column.iter().any(|&m| m) {
                continue;
            }
            let goal = AttackGoal::Targeted(Array1::from_elem(n, class));
            let outcome = runner.run(x, &goal, seed.wrapping_add(class as u64))?;
            attack_runs += 1;
            let (preds, finite) =
                Predictions::from_finite_rows(&classifier.predict_proba(&outcome.adversarial))?;
            let eligible = |i: usize| column[i] && finite[i];
            let fooled = Self::consider(&mut best, &preds, labels, eligible, Some(class));
            debug!("target class {}: fooled {} of {}", class, fooled, n);

            for i in (0..n).filter(|&i| column[i]) {
                attacked[i] = true;
                nonfinite[i] |= outcome.nonfinite[i] || !finite[i];
                informative[i] |= !outcome.vanished[i];
            }
        }

        let mut selection = Selection {
            nonfinite_rows: nonfinite.iter().filter(|&&b| b).count(),
            vanished_rows: (0..n).filter(|&i| attacked[i] && !informative[i]).count(),
            attack_runs,
            ..Selection::default()
        };
        for (i, slot) in best.into_iter().enumerate() {
            let (correct, confidence, chosen) = match slot {
                Some((class, confidence)) => (false, confidence, class),
                None => (true, clean.confidence[i], None),
            };
            selection.correctness.push(correct);
            selection.confidence.push(confidence);
            selection.chosen_class.push(chosen);
        }
        Ok(selection)
    }
}
