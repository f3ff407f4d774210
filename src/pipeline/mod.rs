use indicatif::{ParallelProgressIterator, ProgressFinish};
use rayon::prelude::*;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{ManifestOptions, OutputLayout};
use crate::discover::{discover_studies, DiscoverError};
use crate::errors::{ManifestError, ToolError};
use crate::file::{default_bar, VolumeFileOperations};
use crate::manifest::{build_manifest, write_manifest, ManifestReport};
use crate::tool::Toolkit;

pub mod bias;
pub mod convert;
pub mod extract;
pub mod mask;

pub use bias::correct_volumes;
pub use convert::convert_studies;
pub use extract::extract_archives;
pub use mask::generate_masks;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("Discovery failed: {}", source))]
    Discover {
        #[snafu(source(from(DiscoverError, Box::new)))]
        source: Box<DiscoverError>,
    },

    #[snafu(display("Unable to list inputs in {}: {:?}", path.display(), source))]
    ListInputs {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{} stage failed for {} item(s)", stage, failed))]
    StageFailed { stage: Stage, failed: usize },

    #[snafu(display("Manifest error: {}", source))]
    Manifest {
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Stage {
    Extract,
    Convert,
    Mask,
    Bias,
    Manifest,
}

impl Stage {
    /// Stages run by default. Archive extraction is opt-in.
    pub const DEFAULT: [Stage; 4] = [Stage::Convert, Stage::Mask, Stage::Bias, Stage::Manifest];

    pub fn message(&self) -> &'static str {
        match self {
            Stage::Extract => "Extracting study archives",
            Stage::Convert => "Converting DICOM studies",
            Stage::Mask => "Generating brain masks",
            Stage::Bias => "Correcting bias fields",
            Stage::Manifest => "Writing manifest",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage_str = match self {
            Stage::Extract => "extract",
            Stage::Convert => "convert",
            Stage::Mask => "mask",
            Stage::Bias => "bias",
            Stage::Manifest => "manifest",
        };
        write!(f, "{}", stage_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// The tool ran and wrote these files.
    Completed(Vec<PathBuf>),
    /// Outputs already existed and the tool was not run.
    Skipped(Vec<PathBuf>),
}

impl ItemStatus {
    pub fn outputs(&self) -> &[PathBuf] {
        match self {
            ItemStatus::Completed(outputs) | ItemStatus::Skipped(outputs) => outputs,
        }
    }
}

/// What happened to a single input of a stage.
#[derive(Debug)]
pub struct ItemOutcome {
    input: PathBuf,
    result: Result<ItemStatus, ToolError>,
}

impl ItemOutcome {
    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn result(&self) -> &Result<ItemStatus, ToolError> {
        &self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-item outcomes of one stage, in input order.
#[derive(Debug)]
pub struct StageReport {
    stage: Stage,
    outcomes: Vec<ItemOutcome>,
}

impl StageReport {
    pub fn new(stage: Stage, outcomes: Vec<ItemOutcome>) -> Self {
        Self { stage, outcomes }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn outcomes(&self) -> &[ItemOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn num_completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(ItemStatus::Completed(_))))
            .count()
    }

    pub fn num_skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(ItemStatus::Skipped(_))))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &ToolError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.input(), e)))
    }

    pub fn num_failed(&self) -> usize {
        self.failures().count()
    }

    /// All files written (or found) by successful items.
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .flat_map(|status| status.outputs().iter().cloned())
            .collect()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "{} stage: {} completed, {} skipped, {} failed",
            self.stage,
            self.num_completed(),
            self.num_skipped(),
            self.num_failed()
        );
        if self.num_failed() > 0 {
            tracing::warn!(
                "{} of {} item(s) failed in {} stage",
                self.num_failed(),
                self.len(),
                self.stage
            );
        }
    }
}

/// Run `func` on every item with a progress bar. Failures are logged and recorded; they never
/// stop the remaining items.
pub fn run_stage<T, F>(stage: Stage, items: Vec<T>, func: F) -> StageReport
where
    T: AsRef<Path> + Send,
    F: Fn(&T) -> Result<ItemStatus, ToolError> + Sync + Send,
{
    let pb = default_bar(items.len() as u64).with_finish(ProgressFinish::AndLeave);
    pb.set_message(stage.message());

    let outcomes = items
        .into_par_iter()
        .progress_with(pb)
        .map(|item| {
            let result = func(&item);
            if let Err(e) = &result {
                tracing::warn!("Error in {} stage for {}: {}", stage, item.as_ref().display(), e);
            }
            ItemOutcome {
                input: item.as_ref().to_path_buf(),
                result,
            }
        })
        .collect::<Vec<_>>();

    StageReport::new(stage, outcomes)
}

/// List the volumes a per-volume stage should process.
fn list_volumes(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    dir.find_volumes().context(ListInputsSnafu { path: dir })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub stages: BTreeSet<Stage>,
    /// Do not re-run items whose outputs already exist.
    pub skip_existing: bool,
    /// Stop after the first stage with failures, and fail on manifest anomalies.
    pub strict: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stages: Stage::DEFAULT.into_iter().collect(),
            skip_existing: false,
            strict: false,
        }
    }
}

/// Everything that happened during a pipeline run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    pub manifest: Option<ManifestReport>,
}

impl PipelineReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage() == stage)
    }

    pub fn num_failed(&self) -> usize {
        self.stages.iter().map(|r| r.num_failed()).sum()
    }

    pub fn num_anomalies(&self) -> usize {
        self.manifest
            .as_ref()
            .map(|m| m.num_anomalies())
            .unwrap_or(0)
    }

    /// Whether every item succeeded and the manifest paired cleanly.
    pub fn is_success(&self) -> bool {
        self.num_failed() == 0 && self.num_anomalies() == 0
    }
}

pub struct Pipeline {
    toolkit: Toolkit,
    layout: OutputLayout,
    manifest: ManifestOptions,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        toolkit: Toolkit,
        layout: OutputLayout,
        manifest: ManifestOptions,
        options: PipelineOptions,
    ) -> Self {
        Self {
            toolkit,
            layout,
            manifest,
            options,
        }
    }

    fn enabled(&self, stage: Stage) -> bool {
        self.options.stages.contains(&stage)
    }

    fn finish_stage(
        &self,
        report: StageReport,
        reports: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        report.log_summary();
        let failed = report.num_failed();
        let stage = report.stage();
        reports.stages.push(report);
        match self.options.strict && failed > 0 {
            true => StageFailedSnafu { stage, failed }.fail(),
            false => Ok(()),
        }
    }

    /// Run the enabled stages in order over the studies found under `source`.
    pub fn run<P: AsRef<Path>>(&self, source: P) -> Result<PipelineReport, PipelineError> {
        let source = source.as_ref();
        let mut report = PipelineReport::default();
        let skip_existing = self.options.skip_existing;

        if self.enabled(Stage::Extract) || self.enabled(Stage::Convert) {
            let mut studies = discover_studies(source).context(DiscoverSnafu)?;
            tracing::info!("Number of studies found: {}", studies.len());

            if self.enabled(Stage::Extract) {
                let (extracted, stage_report) =
                    extract_archives(&self.toolkit.extractor, studies, skip_existing);
                studies = extracted;
                self.finish_stage(stage_report, &mut report)?;
            }

            if self.enabled(Stage::Convert) {
                let stage_report = convert_studies(
                    &self.toolkit.converter,
                    studies,
                    &self.layout.images,
                    skip_existing,
                );
                self.finish_stage(stage_report, &mut report)?;
            }
        }

        if self.enabled(Stage::Mask) {
            let volumes = list_volumes(&self.layout.images)?;
            let stage_report = generate_masks(
                &self.toolkit.skull_stripper,
                volumes,
                &self.layout.masks,
                skip_existing,
            );
            self.finish_stage(stage_report, &mut report)?;
        }

        if self.enabled(Stage::Bias) {
            let volumes = list_volumes(&self.layout.images)?;
            let stage_report = correct_volumes(
                &self.toolkit.bias_corrector,
                volumes,
                &self.layout.bias_corrected,
                skip_existing,
            );
            self.finish_stage(stage_report, &mut report)?;
        }

        if self.enabled(Stage::Manifest) {
            let manifest = build_manifest(
                &self.layout.bias_corrected,
                &self.layout.masks,
                &self.manifest,
            )
            .context(ManifestSnafu)?;
            manifest.log_anomalies();
            if self.options.strict {
                manifest.check().context(ManifestSnafu)?;
            }
            write_manifest(&manifest.entries, &self.layout.manifest).context(ManifestSnafu)?;
            tracing::info!(
                "Wrote {} manifest entries to {}",
                manifest.entries.len(),
                self.layout.manifest.display()
            );
            report.manifest = Some(manifest);
        }

        Ok(report)
    }
}
