//! Confidence reports and their on-disk form.
//!
//! A report maps a data source (`clean`, `semantic`, `mc`) to the model's
//! correctness and confidence on each example of a dataset range. Entries
//! only ever grow at the end, which is what lets an interrupted run resume.
use crate::attack::PgdParams;
use crate::dataset::WhichSet;
use crate::error::{ReportError, Result};
use crate::MCFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const CLEAN: &str = "clean";
pub const SEMANTIC: &str = "semantic";
pub const MAX_CONFIDENCE: &str = "mc";

/// Results for one source; index `i` is dataset example `start + i`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReportEntry {
    start: usize,
    correctness: Vec<bool>,
    confidence: Vec<MCFloat>,
}

impl ConfidenceReportEntry {
    pub const fn new(start: usize) -> Self {
        Self {
            start,
            correctness: vec![],
            confidence: vec![],
        }
    }

    pub const fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.start + self.len()
    }

    pub fn len(&self) -> usize {
        self.correctness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correctness.is_empty()
    }

    pub fn correctness(&self) -> &[bool] {
        &self.correctness
    }

    pub fn confidence(&self) -> &[MCFloat] {
        &self.confidence
    }

    /// Whether lengths agree and every confidence is a probability
    pub fn is_consistent(&self) -> bool {
        self.correctness.len() == self.confidence.len()
            && self.confidence.iter().all(|c| (0. ..=1.).contains(c))
    }

    /// Append results for the examples directly after the current end.
    ///
    /// # Errors
    /// If the slices differ in length or a confidence is outside `[0, 1]`;
    /// the entry is left unchanged
    pub fn append(&mut self, correctness: &[bool], confidence: &[MCFloat]) -> Result<()> {
        if correctness.len() != confidence.len() {
            return Err(ReportError::Shape {
                expected: vec![correctness.len()],
                given: vec![confidence.len()],
            });
        }
        if let Some(&bad) = confidence.iter().find(|c| !(0. ..=1.).contains(*c)) {
            return Err(ReportError::InvalidConfidence(bad));
        }
        self.correctness.extend_from_slice(correctness);
        self.confidence.extend_from_slice(confidence);
        Ok(())
    }
}

/// Attack health counters for the `mc` source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackDiagnostics {
    pub attacked_rows: usize,
    pub nonfinite_rows: usize,
    pub vanished_rows: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    which_set: WhichSet,
    start: usize,
    end: usize,
    entries: BTreeMap<String, ConfidenceReportEntry>,
    /// Attack used for the `mc` source
    #[serde(default)]
    pgd: Option<PgdParams>,
    #[serde(default)]
    diagnostics: AttackDiagnostics,
    #[serde(default)]
    completed: bool,
}

impl ConfidenceReport {
    pub fn new(which_set: WhichSet, range: Range<usize>) -> Self {
        Self {
            which_set,
            start: range.start,
            end: range.end,
            entries: BTreeMap::new(),
            pgd: None,
            diagnostics: AttackDiagnostics::default(),
            completed: false,
        }
    }

    /// # Errors
    /// If the file is missing or not a report
    pub fn load(path: &Path) -> Result<Self> {
        let report: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        if let Some((source, _)) = report.entries.iter().find(|(_, e)| !e.is_consistent()) {
            return Err(ReportError::InvalidConfig(format!(
                "report entry {} in {} is malformed",
                source,
                path.display()
            )));
        }
        Ok(report)
    }

    /// Write via a temporary file so a crash mid-write leaves the previous
    /// report intact.
    ///
    /// # Errors
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = tmp_path(path);
        fs::write(&tmp, serde_json::to_string(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub const fn which_set(&self) -> WhichSet {
        self.which_set
    }

    pub const fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    pub const fn diagnostics(&self) -> &AttackDiagnostics {
        &self.diagnostics
    }

    pub fn pgd(&self) -> Option<&PgdParams> {
        self.pgd.as_ref()
    }

    pub fn entry(&self, source: &str) -> Option<&ConfidenceReportEntry> {
        self.entries.get(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Indices of `[start, end)` the source has no results for yet
    pub fn missing(&self, source: &str, end: usize) -> Range<usize> {
        let covered = self.entries.get(source).map_or(self.start, |e| e.end());
        covered.max(self.start)..end.max(covered)
    }

    pub(crate) fn extend_to(&mut self, end: usize) {
        self.end = self.end.max(end);
        self.completed = self.completed && self.all_cover(self.end);
    }

    pub(crate) fn set_pgd(&mut self, params: PgdParams) {
        self.pgd = Some(params);
    }

    pub(crate) fn record_attack(&mut self, attacked: usize, nonfinite: usize, vanished: usize) {
        self.diagnostics.attacked_rows += attacked;
        self.diagnostics.nonfinite_rows += nonfinite;
        self.diagnostics.vanished_rows += vanished;
    }

    /// # Errors
    /// See [`ConfidenceReportEntry::append`]
    pub fn append(&mut self, source: &str, correctness: &[bool], confidence: &[MCFloat]) -> Result<()> {
        let start = self.start;
        self.entries
            .entry(source.to_string())
            .or_insert_with(|| ConfidenceReportEntry::new(start))
            .append(correctness, confidence)
    }

    /// A source with no entry yet covers nothing past `start`.
    fn all_cover(&self, end: usize) -> bool {
        [CLEAN, SEMANTIC, MAX_CONFIDENCE]
            .iter()
            .all(|s| self.entries.get(*s).map_or(self.start, |e| e.end()) >= end)
    }

    /// Mark complete if every source covers the report's range
    pub fn finish(&mut self) -> bool {
        self.completed = self.all_cover(self.end);
        self.completed
    }

    pub fn stats(&self, source: &str) -> Option<ReportStats> {
        self.entries.get(source).map(ReportStats::from_entry)
    }

    /// MaxConfidence is only an upper bound on robustness. Flag results that
    /// look like gradient masking rather than real robustness.
    pub fn masking_warning(&self) -> Option<String> {
        let mut reasons = vec![];
        if let (Some(semantic), Some(mc)) = (self.stats(SEMANTIC), self.stats(MAX_CONFIDENCE)) {
            if semantic.count > 0 && mc.count > 0 && mc.accuracy > semantic.accuracy {
                reasons.push(format!(
                    "accuracy under MaxConfidence ({:.4}) exceeds accuracy on semantic examples ({:.4})",
                    mc.accuracy, semantic.accuracy
                ));
            }
        }
        let d = &self.diagnostics;
        if d.attacked_rows > 0 && 2 * d.vanished_rows > d.attacked_rows {
            reasons.push(format!(
                "{} of {} attacked examples had vanishing gradients",
                d.vanished_rows, d.attacked_rows
            ));
        }
        if reasons.is_empty() {
            None
        } else {
            Some(format!(
                "possible gradient masking: {}; treat MaxConfidence accuracy as an upper bound",
                reasons.join("; ")
            ))
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Summary statistics of one report entry at the 0.5 confidence threshold
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReportStats {
    pub count: usize,
    pub accuracy: MCFloat,
    pub ave_prob_on_mistake: MCFloat,
    pub ave_prob_on_correct: MCFloat,
    /// Accuracy among examples with confidence above 0.5
    pub acc_half: MCFloat,
    /// Fraction of examples with confidence above 0.5
    pub cov_half: MCFloat,
    /// Covered and correct
    pub success_rate: MCFloat,
    /// Covered and wrong
    pub failure_rate: MCFloat,
}

impl ReportStats {
    pub fn from_entry(entry: &ConfidenceReportEntry) -> Self {
        let count = entry.len();
        let n = count.max(1) as MCFloat;
        let pairs = || entry.correctness().iter().zip(entry.confidence().iter());

        let n_correct = pairs().filter(|(&c, _)| c).count();
        let n_wrong = count - n_correct;
        let sum_correct: MCFloat = pairs().filter(|(&c, _)| c).map(|(_, &p)| p).sum();
        let sum_wrong: MCFloat = pairs().filter(|(&c, _)| !c).map(|(_, &p)| p).sum();
        let covered = pairs().filter(|(_, &p)| p > 0.5).count();
        let covered_correct = pairs().filter(|(&c, &p)| c && p > 0.5).count();

        let accuracy = n_correct as MCFloat / n;
        let acc_half = covered_correct as MCFloat / covered.max(1) as MCFloat;
        let cov_half = covered as MCFloat / n;
        Self {
            count,
            accuracy,
            ave_prob_on_mistake: sum_wrong / n_wrong.max(1) as MCFloat,
            ave_prob_on_correct: sum_correct / n_correct.max(1) as MCFloat,
            acc_half,
            cov_half,
            success_rate: acc_half * cov_half,
            failure_rate: (1. - acc_half) * cov_half,
        }
    }
}

impl fmt::Display for ReportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Accuracy on {} examples: {:.4}", self.count, self.accuracy)?;
        writeln!(f, "Average prob on mistakes: {:.4}", self.ave_prob_on_mistake)?;
        writeln!(f, "Average prob on correct: {:.4}", self.ave_prob_on_correct)?;
        writeln!(f, "Accuracy when prob thresholded at .5: {:.4}", self.acc_half)?;
        writeln!(f, "Coverage when prob thresholded at .5: {:.4}", self.cov_half)?;
        writeln!(f, "Success rate at .5: {:.4}", self.success_rate)?;
        write!(f, "Failure rate at .5: {:.4}", self.failure_rate)
    }
}
