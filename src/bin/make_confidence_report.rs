//! Make a confidence report for a saved model.
//!
//! The report records, for every example of the selected range, whether the
//! model is correct and how confident it is on clean examples, on semantic
//! (negated) examples, and under the MaxConfidence attack. Rerunning the same
//! command resumes an interrupted report.
//!
//! Usage:
//!   make_confidence_report model.json
//!   make_confidence_report model.json --which-set train --train-end 1000
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use maxconf::dataset::{JsonLinesDataset, WhichSet};
use maxconf::logging::{self, Silence};
use maxconf::max_confidence::CandidateClasses;
use maxconf::model::ModelBundle;
use maxconf::report::{CLEAN, MAX_CONFIDENCE, SEMANTIC};
use maxconf::{ReportAggregator, ReportConfig, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "make_confidence_report")]
#[command(about = "Evaluate a model on clean, semantic and MaxConfidence adversarial examples")]
struct Cli {
    /// Model file (JSON network plus dataset description)
    #[arg(value_name = "MODEL")]
    model: PathBuf,

    #[arg(long, default_value_t = 0)]
    train_start: usize,
    #[arg(long, default_value_t = 60000)]
    train_end: usize,
    #[arg(long, default_value_t = 0)]
    test_start: usize,
    #[arg(long, default_value_t = 10000)]
    test_end: usize,

    #[arg(long, value_enum, default_value_t = WhichSet::Test)]
    which_set: WhichSet,

    /// Defaults to `<model stem>_report.json` next to the model
    #[arg(long, value_name = "FILE")]
    report_path: Option<PathBuf>,

    #[arg(long, default_value_t = 16)]
    mc_batch_size: usize,
    #[arg(long, default_value_t = 128)]
    batch_size: usize,

    /// Attack iterations
    #[arg(long, default_value_t = 40)]
    nb_iter: usize,
    /// Step size for data in [0, 1]; defaults to the model's dataset value
    #[arg(long)]
    base_eps_iter: Option<f64>,

    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Start attacks at the clean input instead of a random point
    #[arg(long)]
    no_rand_init: bool,
    /// Only attack the K most likely wrong classes of each example
    #[arg(long, value_name = "K")]
    most_likely: Option<usize>,

    /// Discard an existing report instead of resuming it
    #[arg(long)]
    recompute: bool,

    /// log4rs config file
    #[arg(long, value_name = "FILE")]
    log_config: Option<PathBuf>,
    /// Only log warnings and errors while computing
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn report_config(&self) -> ReportConfig {
        ReportConfig {
            batch_size: self.batch_size,
            mc_batch_size: self.mc_batch_size,
            train_start: self.train_start,
            train_end: self.train_end,
            test_start: self.test_start,
            test_end: self.test_end,
            which_set: self.which_set,
            nb_iter: self.nb_iter,
            base_eps_iter: self.base_eps_iter,
            seed: self.seed,
            rand_init: !self.no_rand_init,
            candidates: self
                .most_likely
                .map_or(CandidateClasses::AllOthers, CandidateClasses::MostLikely),
            recompute: self.recompute,
        }
    }

    fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| default_report_path(&self.model))
    }
}

fn default_report_path(model: &Path) -> PathBuf {
    let stem = model
        .file_stem()
        .map_or_else(|| "model".into(), |s| s.to_string_lossy());
    model.with_file_name(format!("{}_report.json", stem))
}

fn run(cli: &Cli) -> Result<()> {
    let bundle = ModelBundle::load(&cli.model)?;
    let dataset = JsonLinesDataset::new(
        bundle.dataset.resolve_dir(&cli.model),
        bundle.dataset.input_shape.clone(),
    );
    let report_path = cli.report_path();
    info!("Writing report to {}", report_path.display());

    let report = {
        let _quiet = cli.quiet.then(|| Silence::new(LevelFilter::Warn));
        ReportAggregator::new(&bundle.network, &dataset, &bundle.dataset, cli.report_config())
            .run(&report_path)?
    };

    for source in [CLEAN, SEMANTIC, MAX_CONFIDENCE] {
        if let Some(stats) = report.stats(source) {
            info!("{} examples\n{}", source, stats);
        }
    }
    if let Some(warning) = report.masking_warning() {
        warn!("{}", warning);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.log_config.as_deref(), LevelFilter::Info) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
