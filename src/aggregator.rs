//! Builds a confidence report for a model, one batch at a time.
//!
//! Three sources are evaluated over the same dataset range, in this order:
//!
//! * `clean`: the unmodified examples
//! * `semantic`: the examples under a fixed [`InputTransform`]
//! * `mc`: the [`MaxConfidence`] attack
//!
//! The report is saved after every batch. Running again on the same path
//! only computes what is missing, so an interrupted run picks up where it
//! stopped and a finished run does no work at all.
use crate::attack::{PgdParams, ProjectedGradientDescent};
use crate::dataset::{Batch, Dataset, DatasetSpec, WhichSet};
use crate::error::{ReportError, Result};
use crate::max_confidence::{CandidateClasses, MaxConfidence, Selection};
use crate::model::Classifier;
use crate::report::{ConfidenceReport, CLEAN, MAX_CONFIDENCE, SEMANTIC};
use crate::runner::{to_model_space, BatchAttackRunner};
use crate::transform::{InputTransform, Negative};
use crate::MCFloat;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Batch size for `clean` and `semantic`
    pub batch_size: usize,
    /// Batch size for `mc`, which runs one attack per class per batch
    pub mc_batch_size: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
    pub which_set: WhichSet,
    pub nb_iter: usize,
    /// Overrides the dataset's reference step size
    pub base_eps_iter: Option<MCFloat>,
    pub seed: u64,
    pub rand_init: bool,
    pub candidates: CandidateClasses,
    /// Discard any existing report instead of resuming it
    pub recompute: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            mc_batch_size: 16,
            train_start: 0,
            train_end: 60000,
            test_start: 0,
            test_end: 10000,
            which_set: WhichSet::Test,
            nb_iter: 40,
            base_eps_iter: None,
            seed: 0,
            rand_init: true,
            candidates: CandidateClasses::AllOthers,
            recompute: false,
        }
    }
}

impl ReportConfig {
    /// # Errors
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.mc_batch_size == 0 {
            return Err(ReportError::InvalidConfig(
                "batch sizes must be positive".to_string(),
            ));
        }
        if self.nb_iter == 0 {
            return Err(ReportError::InvalidConfig(
                "nb_iter must be positive".to_string(),
            ));
        }
        if let CandidateClasses::MostLikely(0) = self.candidates {
            return Err(ReportError::InvalidConfig(
                "at least one candidate class is needed".to_string(),
            ));
        }
        let requested = self.requested_range();
        if requested.start > requested.end {
            return Err(ReportError::InvalidConfig(format!(
                "{} range starts at {} but ends at {}",
                self.which_set, requested.start, requested.end
            )));
        }
        Ok(())
    }

    fn requested_range(&self) -> Range<usize> {
        match self.which_set {
            WhichSet::Train => self.train_start..self.train_end,
            WhichSet::Test => self.test_start..self.test_end,
        }
    }

    /// The selected split's range, clamped to `len` examples
    pub fn range(&self, len: usize) -> Range<usize> {
        let requested = self.requested_range();
        requested.start.min(len)..requested.end.min(len)
    }

    /// Attack budget for data described by `spec`
    ///
    /// # Errors
    /// If the resulting parameters are invalid
    pub fn pgd_params(&self, spec: &DatasetSpec) -> Result<PgdParams> {
        let params = PgdParams::scaled(
            spec.base_eps,
            self.base_eps_iter.unwrap_or(spec.base_eps_iter),
            spec.min_val(),
            spec.max_val,
            self.nb_iter,
            self.rand_init,
        );
        params.validate()?;
        Ok(params)
    }
}

/// Warns once per run when attacks stop getting gradient signal
#[derive(Clone, Debug, Default)]
pub struct GradientMaskingMonitor {
    attacked: usize,
    vanished: usize,
    warned: bool,
}

impl GradientMaskingMonitor {
    /// Record one batch; returns `true` if this call emitted the warning
    pub fn observe(&mut self, batch_start: usize, rows: usize, selection: &Selection) -> bool {
        self.attacked += rows;
        self.vanished += selection.vanished_rows;
        if self.warned || 2 * self.vanished <= self.attacked {
            return false;
        }
        warn!(
            "{} of {} examples attacked so far (batch at {}) got no gradient signal; \
             the model may be masking gradients and MaxConfidence accuracy is only an upper bound",
            self.vanished, self.attacked, batch_start
        );
        self.warned = true;
        true
    }

    pub const fn has_warned(&self) -> bool {
        self.warned
    }
}

pub struct ReportAggregator<'a> {
    classifier: &'a dyn Classifier,
    dataset: &'a dyn Dataset,
    spec: DatasetSpec,
    config: ReportConfig,
    semantic: Box<dyn InputTransform>,
    monitor: GradientMaskingMonitor,
}

impl<'a> ReportAggregator<'a> {
    /// The semantic source defaults to [`Negative`] for the data's range.
    pub fn new(
        classifier: &'a dyn Classifier,
        dataset: &'a dyn Dataset,
        spec: &DatasetSpec,
        config: ReportConfig,
    ) -> Self {
        Self {
            classifier,
            dataset,
            spec: spec.clone(),
            config,
            semantic: Box::new(Negative::for_dataset(spec)),
            monitor: GradientMaskingMonitor::default(),
        }
    }

    #[must_use]
    pub fn with_semantic(mut self, transform: Box<dyn InputTransform>) -> Self {
        self.semantic = transform;
        self
    }

    pub const fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub const fn monitor(&self) -> &GradientMaskingMonitor {
        &self.monitor
    }

    fn open(
        &self,
        path: &Path,
        range: &Range<usize>,
        params: &PgdParams,
    ) -> Result<ConfidenceReport> {
        let which_set = self.config.which_set;
        let fresh = || ConfidenceReport::new(which_set, range.clone());
        if !path.exists() {
            return Ok(fresh());
        }
        if self.config.recompute {
            warn!("Discarding existing report {}", path.display());
            return Ok(fresh());
        }
        let report = ConfidenceReport::load(path)?;
        if report.which_set() != which_set || report.range().start != range.start {
            return Err(ReportError::RangeMismatch {
                found_set: report.which_set(),
                found_start: report.range().start,
                requested_set: which_set,
                requested_start: range.start,
            });
        }
        let has_mc = report.entry(MAX_CONFIDENCE).map_or(false, |e| !e.is_empty());
        if has_mc && report.pgd().map_or(false, |p| p != params) {
            return Err(ReportError::InvalidConfig(format!(
                "{} was made with attack {:?}, not {:?}; rerun with recompute to discard it",
                path.display(),
                report.pgd(),
                params
            )));
        }
        info!(
            "Resuming {} ({} {:?})",
            path.display(),
            report.which_set(),
            report.range()
        );
        Ok(report)
    }

    /// Evaluate one batch for `source`: per-example correctness and confidence
    fn evaluate(
        &mut self,
        source: &str,
        batch: &Batch,
        runner: &BatchAttackRunner,
        report: &mut ConfidenceReport,
    ) -> Result<(Vec<bool>, Vec<MCFloat>)> {
        let x = to_model_space(self.classifier, &batch.inputs)?;
        if source == MAX_CONFIDENCE {
            let seed = self.config.seed.wrapping_add(batch.start as u64);
            let selection = MaxConfidence::new(self.config.candidates).select(
                runner,
                &x,
                &batch.labels,
                seed,
            )?;
            if selection.nonfinite_rows > 0 {
                warn!(
                    "Batch at {}: {} rows hit non-finite gradients",
                    batch.start, selection.nonfinite_rows
                );
            }
            report.record_attack(batch.len(), selection.nonfinite_rows, selection.vanished_rows);
            self.monitor.observe(batch.start, batch.len(), &selection);
            return Ok((selection.correctness, selection.confidence));
        }
        let x = if source == SEMANTIC {
            self.semantic.apply(&x)
        } else {
            x
        };
        let preds = self.classifier.predict(&x)?;
        Ok((preds.correctness(&batch.labels), preds.confidence.to_vec()))
    }

    /// Compute whatever `path` is missing and return the finished report.
    ///
    /// # Errors
    /// On invalid configuration, a report for another range, or any data,
    /// model or I/O failure. Batches saved before the failure are kept.
    pub fn run(&mut self, path: &Path) -> Result<ConfidenceReport> {
        self.config.validate()?;
        let params = self.config.pgd_params(&self.spec)?;
        let which_set = self.config.which_set;
        let range = self.config.range(self.dataset.len(which_set)?);
        self.monitor = GradientMaskingMonitor::default();

        let mut report = self.open(path, &range, &params)?;
        report.extend_to(range.end);
        report.set_pgd(params.clone());
        let runner = BatchAttackRunner::new(self.classifier, ProjectedGradientDescent::new(params));

        for source in [CLEAN, SEMANTIC, MAX_CONFIDENCE] {
            let missing = report.missing(source, range.end);
            if missing.is_empty() {
                debug!("{} already covers {:?}", source, range);
                continue;
            }
            let batch_size = if source == MAX_CONFIDENCE {
                self.config.mc_batch_size
            } else {
                self.config.batch_size
            };
            info!(
                "Computing {} for {} examples {:?}",
                source, which_set, missing
            );
            for batch_start in missing.clone().step_by(batch_size) {
                let batch_end = (batch_start + batch_size).min(missing.end);
                let batch = self.dataset.batch(which_set, batch_start..batch_end)?;
                let (correctness, confidence) =
                    self.evaluate(source, &batch, &runner, &mut report)?;
                report.append(source, &correctness, &confidence)?;
                report.save(path)?;
                info!(
                    "{}: done with examples {}..{} of {:?}",
                    source, batch_start, batch_end, range
                );
            }
        }

        if report.finish() {
            info!("Report {} complete", path.display());
        }
        report.save(path)?;
        if let Some(warning) = report.masking_warning() {
            warn!("{}", warning);
        }
        Ok(report)
    }
}
