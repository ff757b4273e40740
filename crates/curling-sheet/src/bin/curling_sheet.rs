//! `curling-sheet`: rectify overhead curling photos and extract house and line geometry.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use curling_sheet::{
    write_outputs, HouseEdge, OutputPaths, PipelineError, SheetDetectConfig, SheetIoError,
    SheetPipeline,
};
use log::{error, info, LevelFilter};
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use curling_sheet::core::init_tracing;
#[cfg(not(feature = "tracing"))]
use curling_sheet::core::init_with_level;

#[derive(Parser, Debug)]
#[command(name = "curling-sheet")]
#[command(about = "Rectify overhead curling sheet photos and detect the house and ice lines")]
#[command(version)]
struct Cli {
    /// Input images. May be omitted when `--config` names one.
    inputs: Vec<PathBuf>,

    /// Cropped sheet output (single input only).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Overlay output (single input only).
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Geometry JSON output (single input only).
    #[arg(long)]
    json: Option<PathBuf>,

    /// Edge the house should end up at: top, bottom or none.
    #[arg(long)]
    house: Option<HouseEdge>,

    /// JSON run config with parameters and defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Abort an image when analysis takes longer than this.
    #[arg(long)]
    time_budget_ms: Option<u64>,

    /// off, error, warn, info, debug or trace. Builds with the `tracing`
    /// feature read `RUST_LOG` instead.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("no input images given")]
    NoInputs,
    #[error("--out, --overlay and --json need exactly one input image, got {0}")]
    OutputFlagsWithManyInputs(usize),
    #[error("failed to read config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: SheetIoError,
    },
    #[error(transparent)]
    Logger(#[from] log::SetLoggerError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to write outputs: {0}")]
    Output(#[from] SheetIoError),
}

struct Job {
    input: PathBuf,
    paths: OutputPaths,
}

impl Cli {
    fn has_output_flags(&self) -> bool {
        self.out.is_some() || self.overlay.is_some() || self.json.is_some()
    }

    /// Merge flags over the optional config file; flags win.
    fn resolve(&self) -> Result<(SheetDetectConfig, Vec<Job>), CliError> {
        let config = match &self.config {
            Some(path) => Some(SheetDetectConfig::load_json(path).map_err(|source| {
                CliError::Config {
                    path: path.clone(),
                    source,
                }
            })?),
            None => None,
        };

        let inputs = match (self.inputs.is_empty(), &config) {
            (false, _) => self.inputs.clone(),
            (true, Some(cfg)) => vec![PathBuf::from(&cfg.image_path)],
            (true, None) => return Err(CliError::NoInputs),
        };
        if inputs.len() > 1 && self.has_output_flags() {
            return Err(CliError::OutputFlagsWithManyInputs(inputs.len()));
        }

        let mut merged = config
            .clone()
            .unwrap_or_else(|| SheetDetectConfig::for_image(inputs[0].to_string_lossy()));
        if let Some(edge) = self.house {
            merged.house = edge;
        }
        if let Some(budget) = self.time_budget_ms {
            merged.time_budget_ms = Some(budget);
        }

        let jobs = if inputs.len() == 1 {
            let input = inputs[0].clone();
            let mut single = merged.clone();
            if config.as_ref().is_none_or(|c| PathBuf::from(&c.image_path) != input) {
                // Config output paths belong to the config's own image.
                single.cropped_path = None;
                single.overlay_path = None;
                single.json_path = None;
            }
            single.image_path = input.to_string_lossy().into_owned();
            let defaults = single.output_paths();
            let paths = OutputPaths {
                cropped: self.out.clone().unwrap_or(defaults.cropped),
                overlay: self.overlay.clone().unwrap_or(defaults.overlay),
                json: self.json.clone().unwrap_or(defaults.json),
            };
            vec![Job { input, paths }]
        } else {
            inputs
                .into_iter()
                .map(|input| Job {
                    paths: OutputPaths::beside(&input),
                    input,
                })
                .collect()
        };
        Ok((merged, jobs))
    }
}

fn run_job(pipeline: &SheetPipeline, edge: HouseEdge, job: &Job) -> Result<(), CliError> {
    let analysis = pipeline.process_path(&job.input, edge)?;
    write_outputs(&analysis, &job.paths)?;
    Ok(())
}

fn run(cli: &Cli) -> Result<bool, CliError> {
    let (config, jobs) = cli.resolve()?;
    let pipeline = config.build_pipeline();
    info!("processing {} image(s), house edge {}", jobs.len(), config.house);

    let results: Vec<Result<(), CliError>> = jobs
        .par_iter()
        .map(|job| run_job(&pipeline, config.house, job))
        .collect();

    let mut all_ok = true;
    let mut written = Vec::new();
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(()) => written.extend(job.paths.iter().map(|p| p.display().to_string())),
            Err(e) => {
                all_ok = false;
                error!("{}: {e}", job.input.display());
            }
        }
    }
    if !written.is_empty() {
        println!("Wrote:");
        for path in written {
            println!("  {path}");
        }
    }
    Ok(all_ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(not(feature = "tracing"))]
    if let Err(e) = init_with_level(cli.log_level) {
        eprintln!("error: {}", CliError::from(e));
        return ExitCode::FAILURE;
    }
    #[cfg(feature = "tracing")]
    init_tracing(false);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
