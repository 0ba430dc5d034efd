//! The dataset boundary.
//!
//! A [`Dataset`] hands out one [`Batch`] at a time for a split and an index
//! range, always in the same order. Callers never need the whole split in
//! memory.
use crate::error::{ReportError, Result};
use crate::MCFloat;
use log::debug;
use ndarray::{s, Array1, ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WhichSet {
    Train,
    Test,
}

impl fmt::Display for WhichSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Consecutive examples `[start, start + len)` of one split
#[derive(Clone, Debug)]
pub struct Batch {
    /// Dataset index of the first row
    pub start: usize,
    /// `(batch, ..example shape)`
    pub inputs: ArrayD<f32>,
    pub labels: Array1<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len()
    }
}

pub trait Dataset {
    /// Number of examples in the split
    ///
    /// # Errors
    fn len(&self, which_set: WhichSet) -> Result<usize>;

    /// # Errors
    /// If the range runs past the end of the split or the data is malformed
    fn batch(&self, which_set: WhichSet, range: Range<usize>) -> Result<Batch>;
}

/// How a model's data is laid out and scaled
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Directory holding `train.jsonl` and `test.jsonl`
    pub dir: PathBuf,
    pub input_shape: Vec<usize>,
    pub max_val: MCFloat,
    /// Data lies in `[-max_val, max_val]` instead of `[0, max_val]`
    #[serde(default)]
    pub center: bool,
    /// Attack radius if the data were in `[0, 1]`
    pub base_eps: MCFloat,
    /// Attack step if the data were in `[0, 1]`
    pub base_eps_iter: MCFloat,
}

impl DatasetSpec {
    pub fn min_val(&self) -> MCFloat {
        if self.center {
            -self.max_val
        } else {
            0.
        }
    }

    pub fn value_range(&self) -> MCFloat {
        self.max_val - self.min_val()
    }

    /// Relative paths are taken relative to the model file's directory
    pub fn resolve_dir(&self, model_path: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            model_path
                .parent()
                .map_or_else(|| self.dir.clone(), |p| p.join(&self.dir))
        }
    }
}

#[derive(Deserialize)]
struct Record {
    input: Vec<f32>,
    label: usize,
}

/// One JSON object per line: `{"input": [..], "label": 3}`.
///
/// Only the lines of the requested range are parsed. The first access to a
/// split scans it once for the byte offset of every example; batches then
/// seek straight to their first line.
#[derive(Clone, Debug)]
pub struct JsonLinesDataset {
    dir: PathBuf,
    input_shape: Vec<usize>,
    /// Byte offsets of the non-blank lines, indexed by `[train, test]`
    offsets: RefCell<[Option<Vec<u64>>; 2]>,
}

impl JsonLinesDataset {
    pub fn new(dir: PathBuf, input_shape: Vec<usize>) -> Self {
        Self {
            dir,
            input_shape,
            offsets: RefCell::new([None, None]),
        }
    }

    fn path(&self, which_set: WhichSet) -> PathBuf {
        self.dir.join(format!("{}.jsonl", which_set))
    }

    fn reader(&self, which_set: WhichSet) -> Result<BufReader<File>> {
        let path = self.path(which_set);
        File::open(&path)
            .map(BufReader::new)
            .map_err(|e| ReportError::DatasetLoad(format!("{}: {}", path.display(), e)))
    }

    fn scan_offsets(&self, which_set: WhichSet) -> Result<Vec<u64>> {
        let mut reader = self.reader(which_set)?;
        let mut offsets = vec![];
        let mut position = 0;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if !line.trim().is_empty() {
                offsets.push(position);
            }
            position += read as u64;
        }
        debug!("Indexed {} examples of {}", offsets.len(), which_set);
        Ok(offsets)
    }

    /// Run `f` on the split's line offsets, scanning the file on first use
    fn with_offsets<T>(&self, which_set: WhichSet, f: impl FnOnce(&[u64]) -> T) -> Result<T> {
        let slot = match which_set {
            WhichSet::Train => 0,
            WhichSet::Test => 1,
        };
        let mut offsets = self.offsets.borrow_mut();
        if offsets[slot].is_none() {
            offsets[slot] = Some(self.scan_offsets(which_set)?);
        }
        Ok(f(offsets[slot].as_deref().unwrap_or_default()))
    }
}

impl Dataset for JsonLinesDataset {
    fn len(&self, which_set: WhichSet) -> Result<usize> {
        self.with_offsets(which_set, <[u64]>::len)
    }

    fn batch(&self, which_set: WhichSet, range: Range<usize>) -> Result<Batch> {
        let example_len: usize = self.input_shape.iter().product();
        let n = range.len();
        let mut flat = Vec::with_capacity(n * example_len);
        let mut labels = Vec::with_capacity(n);
        let (len, first) =
            self.with_offsets(which_set, |o| (o.len(), o.get(range.start).copied()))?;
        if range.end > len {
            return Err(ReportError::DatasetLoad(format!(
                "{} split ends before index {}",
                which_set, range.end
            )));
        }
        let mut reader = self.reader(which_set)?;
        if let Some(first) = first {
            reader.seek(SeekFrom::Start(first))?;
        }
        let lines = reader
            .lines()
            .filter(|l| l.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .take(n);
        for (offset, line) in lines.enumerate() {
            let record: Record = serde_json::from_str(&line?)?;
            if record.input.len() != example_len {
                return Err(ReportError::DatasetLoad(format!(
                    "{} example {} has {} values, expected {}",
                    which_set,
                    range.start + offset,
                    record.input.len(),
                    example_len
                )));
            }
            flat.extend(record.input);
            labels.push(record.label);
        }
        if labels.len() != n {
            return Err(ReportError::DatasetLoad(format!(
                "{} split ends before index {}",
                which_set, range.end
            )));
        }
        let mut shape = vec![n];
        shape.extend_from_slice(&self.input_shape);
        let inputs = ArrayD::from_shape_vec(IxDyn(&shape), flat)
            .map_err(|e| ReportError::DatasetLoad(e.to_string()))?;
        debug!("Loaded {} examples {:?}", which_set, range);
        Ok(Batch {
            start: range.start,
            inputs,
            labels: Array1::from(labels),
        })
    }
}

/// Both splits held as arrays; useful for small datasets and tests
#[derive(Clone, Debug)]
pub struct InMemoryDataset {
    train: (ArrayD<f32>, Array1<usize>),
    test: (ArrayD<f32>, Array1<usize>),
}

impl InMemoryDataset {
    /// # Errors
    /// If inputs and labels disagree on the number of examples
    pub fn new(
        train: (ArrayD<f32>, Array1<usize>),
        test: (ArrayD<f32>, Array1<usize>),
    ) -> Result<Self> {
        for (inputs, labels) in [&train, &test] {
            if inputs.ndim() == 0 || inputs.len_of(Axis(0)) != labels.len() {
                return Err(ReportError::Shape {
                    expected: vec![labels.len()],
                    given: inputs.shape().to_vec(),
                });
            }
        }
        Ok(Self { train, test })
    }

    fn split(&self, which_set: WhichSet) -> &(ArrayD<f32>, Array1<usize>) {
        match which_set {
            WhichSet::Train => &self.train,
            WhichSet::Test => &self.test,
        }
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self, which_set: WhichSet) -> Result<usize> {
        Ok(self.split(which_set).1.len())
    }

    fn batch(&self, which_set: WhichSet, range: Range<usize>) -> Result<Batch> {
        let (inputs, labels) = self.split(which_set);
        if range.end > labels.len() || range.start > range.end {
            return Err(ReportError::DatasetLoad(format!(
                "{} split ends before index {}",
                which_set, range.end
            )));
        }
        Ok(Batch {
            start: range.start,
            inputs: inputs
                .slice_axis(Axis(0), Slice::from(range.clone()))
                .to_owned(),
            labels: labels.slice(s![range.clone()]).to_owned(),
        })
    }
}
