//! Wrappers around the external command-line tools that do the actual image processing.
//!
//! Each wrapper builds the command line, runs it to completion, and checks that the file
//! the next stage depends on was actually written.
use itertools::Itertools;
use snafu::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::{SkullStripParams, ToolEnvironment, ToolsConfig};
use crate::discover::StudyUnit;
use crate::errors::tool::{
    CreateDirSnafu, ExitStatusSnafu, InvalidInputSnafu, ListOutputsSnafu, MissingOutputSnafu,
    MoveOutputSnafu, SpawnSnafu, StagingSnafu,
};
use crate::errors::ToolError;
use crate::file::{binary_mask_name, restored_name, VolumeFileOperations, VOLUME_SUFFIX};

pub trait ExternalTool {
    fn program(&self) -> &str;

    /// A command for this tool with stdin detached.
    fn command(&self) -> Command {
        let mut command = Command::new(self.program());
        command.stdin(Stdio::null());
        command
    }

    /// Run a command to completion, failing on a non-zero exit status.
    fn run(&self, mut command: Command) -> Result<(), ToolError> {
        let program = self.program();
        tracing::debug!("Running {:?}", command);
        let output = command.output().context(SpawnSnafu { program })?;
        if !output.status.success() {
            return ExitStatusSnafu {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .fail();
        }
        Ok(())
    }

    /// Check that a file the tool was expected to write exists.
    fn expect_output(&self, path: PathBuf) -> Result<PathBuf, ToolError> {
        match path.is_file() {
            true => Ok(path),
            false => MissingOutputSnafu {
                program: self.program(),
                path,
            }
            .fail(),
        }
    }
}

fn create_dir(path: &Path) -> Result<(), ToolError> {
    std::fs::create_dir_all(path).context(CreateDirSnafu { path })
}

/// DICOM to volume converter, invoked as `{program} -z y -f {name} -o {dir} {input}`.
#[derive(Debug, Clone)]
pub struct Converter {
    program: String,
}

impl ExternalTool for Converter {
    fn program(&self) -> &str {
        &self.program
    }
}

impl Converter {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    pub fn args(unit: &StudyUnit, output_dir: &Path) -> Vec<String> {
        vec![
            "-z".to_string(),
            "y".to_string(),
            "-f".to_string(),
            unit.output_name(),
            "-o".to_string(),
            output_dir.display().to_string(),
            unit.path().display().to_string(),
        ]
    }

    /// The volume a single-series study converts to.
    pub fn expected_output(unit: &StudyUnit, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}{}", unit.output_name(), VOLUME_SUFFIX))
    }

    /// Private directory the converter writes into before outputs are moved to `output_dir`.
    pub fn staging_dir(unit: &StudyUnit, output_dir: &Path) -> PathBuf {
        output_dir.join(format!(".{}.converting", unit.output_name()))
    }

    /// Convert a study into `output_dir`, returning the volumes written by this run.
    ///
    /// The converter may split a study into several volumes (`{name}_e1.nii.gz`, ...), so
    /// everything it writes into the staging directory is moved over, sidecars included.
    pub fn convert(&self, unit: &StudyUnit, output_dir: &Path) -> Result<Vec<PathBuf>, ToolError> {
        let staging = Self::staging_dir(unit, output_dir);
        if staging.is_dir() {
            std::fs::remove_dir_all(&staging).context(StagingSnafu { path: &staging })?;
        }
        create_dir(&staging)?;

        let result = self.convert_staged(unit, &staging, output_dir);
        if let Err(e) = std::fs::remove_dir_all(&staging) {
            tracing::warn!("Unable to remove {}: {}", staging.display(), e);
        }
        result
    }

    fn convert_staged(
        &self,
        unit: &StudyUnit,
        staging: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ToolError> {
        let mut command = self.command();
        command.args(Self::args(unit, staging));
        self.run(command)?;

        let written = std::fs::read_dir(staging)
            .and_then(|entries| {
                entries
                    .map(|entry| entry.map(|e| e.path()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .context(ListOutputsSnafu { path: staging })?;

        let mut volumes = Vec::new();
        for file in written.into_iter().filter(|f| f.is_file()).sorted() {
            let Some(name) = file.file_name() else {
                continue;
            };
            let dest = output_dir.join(name);
            std::fs::rename(&file, &dest).context(MoveOutputSnafu { path: &dest })?;
            if dest.has_volume_extension() {
                volumes.push(dest);
            }
        }

        if volumes.is_empty() {
            return MissingOutputSnafu {
                program: self.program(),
                path: Self::expected_output(unit, output_dir),
            }
            .fail();
        }
        Ok(volumes)
    }
}

/// Brain extraction tool, invoked as `{program} {input} {output} -f {frac} -g {grad} -m`.
#[derive(Debug, Clone)]
pub struct SkullStripper {
    program: String,
    params: SkullStripParams,
    env: ToolEnvironment,
}

impl ExternalTool for SkullStripper {
    fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.program());
        command.stdin(Stdio::null());
        self.env.apply(&mut command);
        command
    }
}

impl SkullStripper {
    pub fn new(program: &str, params: SkullStripParams, env: ToolEnvironment) -> Self {
        Self {
            program: program.to_string(),
            params,
            env,
        }
    }

    /// Path requested from the tool for `volume`.
    pub fn requested_output(volume: &Path, masks_dir: &Path) -> Result<PathBuf, ToolError> {
        let name = volume
            .mask_name()
            .context(InvalidInputSnafu { path: volume })?;
        Ok(masks_dir.join(name))
    }

    /// Path of the binary mask the tool writes alongside the requested output.
    pub fn mask_output(volume: &Path, masks_dir: &Path) -> Result<PathBuf, ToolError> {
        let name = volume
            .mask_name()
            .as_deref()
            .and_then(binary_mask_name)
            .context(InvalidInputSnafu { path: volume })?;
        Ok(masks_dir.join(name))
    }

    pub fn args(&self, volume: &Path, output: &Path) -> Vec<String> {
        vec![
            volume.display().to_string(),
            output.display().to_string(),
            "-f".to_string(),
            self.params.fractional_threshold.to_string(),
            "-g".to_string(),
            self.params.gradient_threshold.to_string(),
            "-m".to_string(),
        ]
    }

    /// Skull-strip `volume` into `masks_dir`, returning the binary mask path.
    pub fn strip(&self, volume: &Path, masks_dir: &Path) -> Result<PathBuf, ToolError> {
        create_dir(masks_dir)?;
        let output = Self::requested_output(volume, masks_dir)?;
        let mut command = self.command();
        command.args(self.args(volume, &output));
        self.run(command)?;
        self.expect_output(Self::mask_output(volume, masks_dir)?)
    }
}

/// Bias-field corrector, invoked as `{program} -B -o {output} {input}`.
#[derive(Debug, Clone)]
pub struct BiasCorrector {
    program: String,
    env: ToolEnvironment,
}

impl ExternalTool for BiasCorrector {
    fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.program());
        command.stdin(Stdio::null());
        self.env.apply(&mut command);
        command
    }
}

impl BiasCorrector {
    pub fn new(program: &str, env: ToolEnvironment) -> Self {
        Self {
            program: program.to_string(),
            env,
        }
    }

    pub fn requested_output(volume: &Path, output_dir: &Path) -> Result<PathBuf, ToolError> {
        let name = volume
            .bias_corrected_name()
            .context(InvalidInputSnafu { path: volume })?;
        Ok(output_dir.join(name))
    }

    /// Path of the corrected image, which the tool names by appending `_restore`.
    pub fn restored_output(volume: &Path, output_dir: &Path) -> Result<PathBuf, ToolError> {
        let name = volume
            .bias_corrected_name()
            .as_deref()
            .and_then(restored_name)
            .context(InvalidInputSnafu { path: volume })?;
        Ok(output_dir.join(name))
    }

    pub fn args(volume: &Path, output: &Path) -> Vec<String> {
        vec![
            "-B".to_string(),
            "-o".to_string(),
            output.display().to_string(),
            volume.display().to_string(),
        ]
    }

    /// Bias-correct `volume` into `output_dir`, returning the corrected image path.
    pub fn correct(&self, volume: &Path, output_dir: &Path) -> Result<PathBuf, ToolError> {
        create_dir(output_dir)?;
        let output = Self::requested_output(volume, output_dir)?;
        let mut command = self.command();
        command.args(Self::args(volume, &output));
        self.run(command)?;
        self.expect_output(Self::restored_output(volume, output_dir)?)
    }
}

/// Archive extractor, invoked as `{program} -o -q {archive} -d {dir}`.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    program: String,
}

impl ExternalTool for ArchiveExtractor {
    fn program(&self) -> &str {
        &self.program
    }
}

impl ArchiveExtractor {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    pub fn args(unit: &StudyUnit) -> Vec<String> {
        vec![
            "-o".to_string(),
            "-q".to_string(),
            unit.path().display().to_string(),
            "-d".to_string(),
            unit.extraction_dir().display().to_string(),
        ]
    }

    /// Extract an archived study next to the archive. The archive itself is left in place.
    pub fn extract(&self, unit: &StudyUnit) -> Result<StudyUnit, ToolError> {
        let extracted = unit.extracted();
        let mut command = self.command();
        command.args(Self::args(unit));
        self.run(command)?;
        match extracted.path().is_dir() {
            true => Ok(extracted),
            false => MissingOutputSnafu {
                program: self.program(),
                path: extracted.path(),
            }
            .fail(),
        }
    }
}

/// The full set of tools used by the pipeline.
#[derive(Debug, Clone)]
pub struct Toolkit {
    pub converter: Converter,
    pub skull_stripper: SkullStripper,
    pub bias_corrector: BiasCorrector,
    pub extractor: ArchiveExtractor,
}

impl Toolkit {
    pub fn new(tools: &ToolsConfig, params: SkullStripParams, env: ToolEnvironment) -> Self {
        Self {
            converter: Converter::new(&tools.converter),
            skull_stripper: SkullStripper::new(&tools.skull_stripper, params, env.clone()),
            bias_corrector: BiasCorrector::new(&tools.bias_corrector, env),
            extractor: ArchiveExtractor::new(&tools.extractor),
        }
    }
}
