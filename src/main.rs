use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;
use rayon::ThreadPoolBuilder;
use snafu::{Report, ResultExt, Snafu, Whatever};
use tracing::{error, Level};

use brain_preprocessing::config::{OutputLayout, PipelineConfig};
use brain_preprocessing::errors::ConfigError;
use brain_preprocessing::pipeline::{
    Pipeline, PipelineError, PipelineOptions, PipelineReport, Stage,
};
use brain_preprocessing::tool::Toolkit;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("Invalid output path: {}", path.display()))]
    InvalidOutputPath { path: PathBuf },

    #[snafu(display("Configuration error: {}", source))]
    Config {
        #[snafu(source(from(ConfigError, Box::new)))]
        source: Box<ConfigError>,
    },

    #[snafu(display("Could not build thread pool: {:?}", source))]
    ThreadPool {
        #[snafu(source(from(rayon::ThreadPoolBuildError, Box::new)))]
        source: Box<rayon::ThreadPoolBuildError>,
    },

    #[snafu(display("Pipeline error: {}", source))]
    Pipeline {
        #[snafu(source(from(PipelineError, Box::new)))]
        source: Box<PipelineError>,
    },
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Convert DICOM studies to volumes, skull-strip, bias-correct, and build an image/mask manifest", long_about = None)]
struct Args {
    #[arg(help = "Source directory, with one subdirectory per patient holding study directories or .zip archives")]
    source: PathBuf,

    #[arg(help = "Output directory. Stage outputs are written to images/, masks/ and bias_corrected/ within it")]
    output: PathBuf,

    #[arg(
        help = "TOML configuration file. Command line options take precedence",
        long = "config",
        short = 'c'
    )]
    config: Option<PathBuf>,

    #[arg(
        help = "Stages to run, comma separated",
        long = "stages",
        short = 's',
        value_enum,
        value_delimiter = ',',
        default_values_t = Stage::DEFAULT
    )]
    stages: Vec<Stage>,

    #[arg(
        help = "Extract .zip study archives before conversion",
        long = "extract-archives",
        short = 'x',
        default_value_t = false
    )]
    extract_archives: bool,

    #[arg(
        help = "Manifest path, extension determines format: .csv or .parquet (default: <output>/manifest.csv)",
        long = "manifest",
        short = 'm'
    )]
    manifest: Option<PathBuf>,

    #[arg(help = "DICOM to volume converter executable", long = "converter")]
    converter: Option<String>,

    #[arg(help = "Skull-stripping executable", long = "skull-stripper")]
    skull_stripper: Option<String>,

    #[arg(help = "Bias-field correction executable", long = "bias-corrector")]
    bias_corrector: Option<String>,

    #[arg(help = "Archive extraction executable", long = "extractor")]
    extractor: Option<String>,

    #[arg(
        help = "Toolkit installation root passed to the skull-stripper and bias corrector",
        long = "fsl-dir"
    )]
    fsl_dir: Option<PathBuf>,

    #[arg(
        help = "Fractional intensity threshold for skull-stripping (default: 0.5)",
        long = "fractional-threshold",
        short = 'f'
    )]
    fractional_threshold: Option<f32>,

    #[arg(
        help = "Vertical gradient threshold for skull-stripping (default: 0)",
        long = "gradient-threshold",
        short = 'g'
    )]
    gradient_threshold: Option<f32>,

    #[arg(help = "Study label written to the manifest (default: SOLID)", long = "study")]
    study: Option<String>,

    #[arg(
        help = "Number of items to process in parallel (default: number of CPUs)",
        long = "jobs",
        short = 'j'
    )]
    jobs: Option<usize>,

    #[arg(
        help = "Skip items whose outputs already exist",
        long = "skip-existing",
        default_value_t = false
    )]
    skip_existing: bool,

    #[arg(
        help = "Stop after the first stage with failures, and fail if any image cannot be paired with a mask",
        long = "strict",
        default_value_t = false
    )]
    strict: bool,

    #[arg(
        help = "Increase logging verbosity (-v for info, -vv for debug)",
        short = 'v',
        action = clap::ArgAction::Count
    )]
    verbose: u8,
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

fn main() {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(log_level(args.verbose))
            .with_writer(std::io::stderr)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    match run(args) {
        Ok(report) if report.is_success() => {}
        Ok(report) => {
            error!(
                "Pipeline finished with {} failed item(s) and {} unpaired manifest file(s)",
                report.num_failed(),
                report.num_anomalies()
            );
            std::process::exit(2);
        }
        Err(e) => {
            error!("{}", Report::from_error(e));
            std::process::exit(-1);
        }
    }
}

/// Merge the config file (if any) with command line options into a pipeline.
fn build_pipeline(args: &Args) -> Result<Pipeline, Error> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path).context(ConfigSnafu)?,
        None => PipelineConfig::default(),
    };

    if let Some(converter) = &args.converter {
        config.tools.converter = converter.clone();
    }
    if let Some(skull_stripper) = &args.skull_stripper {
        config.tools.skull_stripper = skull_stripper.clone();
    }
    if let Some(bias_corrector) = &args.bias_corrector {
        config.tools.bias_corrector = bias_corrector.clone();
    }
    if let Some(extractor) = &args.extractor {
        config.tools.extractor = extractor.clone();
    }
    if let Some(fsl_dir) = &args.fsl_dir {
        config.fsl.root = Some(fsl_dir.clone());
    }
    if let Some(threshold) = args.fractional_threshold {
        config.skull_strip.fractional_threshold = threshold;
    }
    if let Some(threshold) = args.gradient_threshold {
        config.skull_strip.gradient_threshold = threshold;
    }
    if let Some(study) = &args.study {
        config.manifest.study = study.clone();
    }
    if let Some(manifest) = &args.manifest {
        config.paths.manifest = Some(manifest.clone());
    }

    let layout = OutputLayout::new(&args.output).with_overrides(&config.paths);
    let toolkit = Toolkit::new(&config.tools, config.skull_strip, config.fsl);

    let mut stages = args.stages.iter().copied().collect::<BTreeSet<_>>();
    if args.extract_archives {
        stages.insert(Stage::Extract);
    }
    let options = PipelineOptions {
        stages,
        skip_existing: args.skip_existing,
        strict: args.strict,
    };

    Ok(Pipeline::new(toolkit, layout, config.manifest, options))
}

fn run(args: Args) -> Result<PipelineReport, Error> {
    let converts = args.extract_archives
        || args.stages.contains(&Stage::Convert)
        || args.stages.contains(&Stage::Extract);
    if converts && !args.source.is_dir() {
        return InvalidSourcePathSnafu { path: args.source }.fail();
    }
    if args.output.is_file() {
        return InvalidOutputPathSnafu { path: args.output }.fail();
    }

    let pipeline = build_pipeline(&args)?;
    let report = match args.jobs {
        Some(jobs) => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .context(ThreadPoolSnafu)?;
            pool.install(|| pipeline.run(&args.source))
        }
        None => pipeline.run(&args.source),
    }
    .context(PipelineSnafu)?;

    Ok(report)
}
