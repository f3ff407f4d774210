use clap::Parser;
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::path::PathBuf;
use tracing::{error, Level};

use brain_preprocessing::config::{PipelineConfig, DEFAULT_MANIFEST_FILENAME};
use brain_preprocessing::errors::{ConfigError, ManifestError};
use brain_preprocessing::manifest::{build_manifest, write_manifest, ManifestReport};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid output path: {}", path.display()))]
    InvalidOutputPath { path: PathBuf },

    #[snafu(display("Configuration error: {}", source))]
    Config {
        #[snafu(source(from(ConfigError, Box::new)))]
        source: Box<ConfigError>,
    },

    #[snafu(display("Error creating manifest: {}", source))]
    CreateManifest {
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },

    #[snafu(display("Error writing manifest: {}", source))]
    WriteManifest {
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Pair bias-corrected images with brain masks and write a feature extraction manifest", long_about = None)]
struct Args {
    #[arg(help = "Directory of bias-corrected images (*_biascorr_restore.nii.gz)")]
    images: PathBuf,

    #[arg(help = "Directory of brain masks (*_mask_mask.nii.gz)")]
    masks: PathBuf,

    #[arg(help = "Output filepath, extension determines format: .csv or .parquet (default: <images>/manifest.csv)")]
    output: Option<PathBuf>,

    #[arg(
        help = "TOML configuration file; its [manifest] section supplies labels, exclusions and renames",
        long = "config",
        short = 'c'
    )]
    config: Option<PathBuf>,

    #[arg(help = "Study label (default: SOLID)", long = "study")]
    study: Option<String>,

    #[arg(help = "ROI label (default: 1)", long = "label")]
    label: Option<String>,

    #[arg(
        help = "Image filename to leave out of the manifest, may be repeated",
        long = "exclude",
        short = 'e'
    )]
    exclude: Vec<String>,

    #[arg(
        help = "Fail if any image or mask cannot be paired, or any image name cannot be parsed",
        long = "strict",
        default_value_t = false
    )]
    strict: bool,

    #[arg(
        help = "Increase log verbosity (-v for info, -vv for debug)",
        short = 'v',
        action = clap::ArgAction::Count
    )]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(match args.verbose {
                0 => Level::WARN,
                1 => Level::INFO,
                _ => Level::DEBUG,
            })
            .with_writer(std::io::stderr)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    match run(args) {
        Ok(report) if report.is_clean() => {}
        Ok(report) => {
            error!("{}", anomaly_summary(&report));
            std::process::exit(2);
        }
        Err(e) => {
            error!("{}", Report::from_error(e));
            std::process::exit(-1);
        }
    }
}

fn anomaly_summary(report: &ManifestReport) -> String {
    format!(
        "Manifest written with {} entries; {} unpaired or malformed file(s) left out",
        report.entries.len(),
        report.num_anomalies()
    )
}

fn run(args: Args) -> Result<ManifestReport, Error> {
    let dest = match args.output {
        Some(output) if output.is_dir() => Err(Error::InvalidOutputPath { path: output }),
        Some(output) => Ok(output),
        None => Ok(args.images.join(DEFAULT_MANIFEST_FILENAME)),
    }?;

    let mut options = match &args.config {
        Some(path) => PipelineConfig::from_file(path).context(ConfigSnafu)?,
        None => PipelineConfig::default(),
    }
    .manifest;
    if let Some(study) = args.study {
        options.study = study;
    }
    if let Some(label) = args.label {
        options.label = label;
    }
    options.exclude.extend(args.exclude);

    let report = build_manifest(&args.images, &args.masks, &options).context(CreateManifestSnafu)?;
    report.log_anomalies();
    if args.strict {
        report.check().context(CreateManifestSnafu)?;
    }
    tracing::info!("Number of entries found: {}", report.entries.len());

    write_manifest(&report.entries, &dest).context(WriteManifestSnafu)?;
    Ok(report)
}
