use approx::assert_abs_diff_eq;
use maxconf::dataset::{Dataset, DatasetSpec};
use maxconf::model::{Classifier, ModelBundle};
use maxconf::report::{CLEAN, MAX_CONFIDENCE, SEMANTIC};
use maxconf::{ConfidenceReport, ReportAggregator, ReportConfig, ReportError};
use more_asserts::assert_gt;
use ndarray::{arr1, arr2};
use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

mod common;
use common::*;

fn three_class_model() -> maxconf::dnn::DNN {
    linear_dnn(
        arr2(&[[1., 0.], [0., 1.], [0., 0.]]),
        arr1(&[0., 0., 0.5]),
    )
}

fn run(
    classifier: &dyn Classifier,
    dataset: &dyn Dataset,
    spec: &DatasetSpec,
    config: ReportConfig,
    path: &Path,
) -> maxconf::Result<ConfidenceReport> {
    ReportAggregator::new(classifier, dataset, spec, config).run(path)
}

fn softmax3(logits: [f64; 3], class: usize) -> f64 {
    let z: f64 = logits.iter().map(|l| l.exp()).sum();
    logits[class].exp() / z
}

/// Two examples of class 0 under `logits = (x0, x1, 0.5)` with one step of
/// size 0.125. The first survives both targeted attacks; the second is
/// pushed into class 2 by both, and the attack on class 2 is more confident.
#[test]
fn test_three_class_closed_form() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let model = three_class_model();
    let data = in_memory(vec![vec![0.875, 0.125], vec![0.5625, 0.125]], vec![0, 0]);
    let config = ReportConfig {
        nb_iter: 1,
        rand_init: false,
        ..ReportConfig::default()
    };
    let report = run(&model, &data, &unit_spec(2, 0.125, 0.125), config, &path).unwrap();

    let clean = report.entry(CLEAN).unwrap();
    assert_eq!(clean.correctness(), &[true, true]);
    assert_abs_diff_eq!(clean.confidence()[0], softmax3([0.875, 0.125, 0.5], 0), epsilon = 1e-12);

    let semantic = report.entry(SEMANTIC).unwrap();
    assert_eq!(semantic.correctness(), &[false, false]);
    assert_abs_diff_eq!(
        semantic.confidence()[1],
        softmax3([0.4375, 0.875, 0.5], 1),
        epsilon = 1e-12
    );

    let mc = report.entry(MAX_CONFIDENCE).unwrap();
    assert_eq!(mc.correctness(), &[true, false]);
    assert_abs_diff_eq!(mc.confidence()[0], clean.confidence()[0], epsilon = 1e-12);
    assert_abs_diff_eq!(mc.confidence()[1], softmax3([0.4375, 0., 0.5], 2), epsilon = 1e-12);
    assert_gt!(mc.confidence()[1], softmax3([0.4375, 0.25, 0.5], 2));

    assert!(report.is_completed());
    assert!(report.masking_warning().is_some());
    let stats = report.stats(MAX_CONFIDENCE).unwrap();
    assert_abs_diff_eq!(stats.accuracy, 0.5, epsilon = 1e-12);
}

#[test]
fn test_rerun_does_no_work() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let model = three_class_model();
    let probe = CountingClassifier::new(&model);
    let data = scattered(9, 2, 3);
    let spec = unit_spec(2, 0.1, 0.05);
    let config = ReportConfig {
        batch_size: 4,
        mc_batch_size: 3,
        nb_iter: 3,
        ..ReportConfig::default()
    };

    let first = run(&probe, &data, &spec, config.clone(), &path).unwrap();
    assert!(probe.gradient_calls.get() > 0);
    probe.logit_calls.set(0);
    probe.gradient_calls.set(0);

    let second = run(&probe, &data, &spec, config, &path).unwrap();
    assert_eq!(probe.calls(), 0);
    assert_eq!(first, second);
}

#[test]
fn test_interrupted_runs_match_single_run() {
    let dir = tempfile::tempdir().unwrap();
    let model = linear_dnn(
        arr2(&[[2., -1., 0.5], [-1., 2., 0.], [0.5, 0.5, -1.]]),
        arr1(&[0., 0.1, 0.2]),
    );
    let data = scattered(10, 3, 3);
    let spec = unit_spec(3, 0.2, 0.05);
    let config = ReportConfig {
        batch_size: 3,
        mc_batch_size: 2,
        nb_iter: 5,
        seed: 11,
        ..ReportConfig::default()
    };

    let single_path = dir.path().join("single.json");
    let single = run(&model, &data, &spec, config.clone(), &single_path).unwrap();

    let resumed_path = dir.path().join("resumed.json");
    let mut attempts = 0;
    let mut served = 0;
    let resumed = loop {
        attempts += 1;
        assert!(attempts < 10, "no progress across restarts");
        let flaky = InterruptedDataset {
            inner: &data,
            budget: Cell::new(3),
        };
        let result = run(&model, &flaky, &spec, config.clone(), &resumed_path);
        served += 3 - flaky.budget.get();
        match result {
            Ok(report) => break report,
            Err(ReportError::DatasetLoad(_)) => {
                let partial = ConfidenceReport::load(&resumed_path).unwrap();
                assert!(!partial.is_completed());
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    };
    assert!(attempts > 1);
    // 4 clean, 4 semantic and 5 mc batches, each computed exactly once
    assert_eq!(served, 13);
    assert_eq!(resumed, single);
}

#[test]
fn test_growing_the_range_keeps_earlier_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let model = three_class_model();
    let data = scattered(8, 2, 3);
    let spec = unit_spec(2, 0.1, 0.05);
    let short = ReportConfig {
        test_end: 4,
        batch_size: 2,
        mc_batch_size: 2,
        nb_iter: 2,
        ..ReportConfig::default()
    };
    let first = run(&model, &data, &spec, short.clone(), &path).unwrap();
    assert_eq!(first.entry(CLEAN).unwrap().len(), 4);

    let long = ReportConfig {
        test_end: 8,
        ..short
    };
    let second = run(&model, &data, &spec, long, &path).unwrap();
    assert!(second.is_completed());
    assert_eq!(second.range(), 0..8);
    for source in [CLEAN, SEMANTIC, MAX_CONFIDENCE] {
        let before = first.entry(source).unwrap();
        let after = second.entry(source).unwrap();
        assert_eq!(after.len(), 8);
        assert_eq!(&after.correctness()[..4], before.correctness());
        assert_eq!(&after.confidence()[..4], before.confidence());
    }
}

fn write_model_dir(dir: &Path) -> std::path::PathBuf {
    fs::create_dir(dir.join("data")).unwrap();
    let mut test_split = fs::File::create(dir.join("data").join("test.jsonl")).unwrap();
    for (x, y, label) in [(0.875, 0.125, 0), (0.5625, 0.125, 0), (0.25, 0.75, 1)] {
        writeln!(test_split, "{{\"input\": [{}, {}], \"label\": {}}}", x, y, label).unwrap();
    }
    let model_path = dir.join("linear.json");
    ModelBundle {
        network: three_class_model(),
        dataset: unit_spec(2, 0.125, 0.125),
    }
    .save(&model_path)
    .unwrap();
    model_path
}

#[test]
fn test_bundle_drives_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = write_model_dir(dir.path());
    let bundle = ModelBundle::load(&model_path).unwrap();
    let data = maxconf::dataset::JsonLinesDataset::new(
        bundle.dataset.resolve_dir(&model_path),
        bundle.dataset.input_shape.clone(),
    );
    let report = run(
        &bundle.network,
        &data,
        &bundle.dataset,
        ReportConfig {
            nb_iter: 1,
            rand_init: false,
            ..ReportConfig::default()
        },
        &dir.path().join("report.json"),
    )
    .unwrap();
    assert_eq!(report.range(), 0..3);
    assert_eq!(
        report.entry(MAX_CONFIDENCE).unwrap().correctness(),
        &[true, false, true]
    );
}

#[test]
fn test_cli() {
    let exe = env!("CARGO_BIN_EXE_make_confidence_report");
    let dir = tempfile::tempdir().unwrap();
    let model_path = write_model_dir(dir.path());

    let usage = Command::new(exe).output().unwrap();
    assert_eq!(usage.status.code(), Some(2));

    let missing = dir.path().join("missing.json");
    let failed = Command::new(exe).arg(&missing).output().unwrap();
    assert!(!failed.status.success());
    assert!(!dir.path().join("missing_report.json").exists());

    let ok = Command::new(exe)
        .arg(&model_path)
        .args(["--nb-iter", "2", "--no-rand-init", "--quiet"])
        .output()
        .unwrap();
    assert!(ok.status.success(), "{}", String::from_utf8_lossy(&ok.stderr));
    let report = ConfidenceReport::load(&dir.path().join("linear_report.json")).unwrap();
    assert!(report.is_completed());
}
