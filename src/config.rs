use serde::Deserialize;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::config::{ParseConfigSnafu, ReadConfigSnafu};
use crate::errors::ConfigError;

pub const DEFAULT_IMAGES_DIR: &str = "images";
pub const DEFAULT_MASKS_DIR: &str = "masks";
pub const DEFAULT_BIAS_CORRECTED_DIR: &str = "bias_corrected";
pub const DEFAULT_MANIFEST_FILENAME: &str = "manifest.csv";

pub const DEFAULT_CONVERTER: &str = "dcm2niix";
pub const DEFAULT_SKULL_STRIPPER: &str = "bet";
pub const DEFAULT_BIAS_CORRECTOR: &str = "fast";
pub const DEFAULT_EXTRACTOR: &str = "unzip";

pub const DEFAULT_OUTPUT_TYPE: &str = "NIFTI_GZ";
pub const DEFAULT_FRACTIONAL_THRESHOLD: f32 = 0.5;
pub const DEFAULT_GRADIENT_THRESHOLD: f32 = 0.0;

pub const DEFAULT_STUDY_LABEL: &str = "SOLID";
pub const DEFAULT_ROI_LABEL: &str = "1";

/// Pipeline configuration as read from a TOML file. Every field is optional so that
/// a file only needs to name what it changes.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub tools: ToolsConfig,
    pub fsl: ToolEnvironment,
    pub skull_strip: SkullStripParams,
    pub manifest: ManifestOptions,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;
        toml::from_str(&contents).context(ParseConfigSnafu { path })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub images: Option<PathBuf>,
    pub masks: Option<PathBuf>,
    pub bias_corrected: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}

/// Output locations for each stage, resolved against an output root.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub images: PathBuf,
    pub masks: PathBuf,
    pub bias_corrected: PathBuf,
    pub manifest: PathBuf,
}

impl OutputLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            images: root.join(DEFAULT_IMAGES_DIR),
            masks: root.join(DEFAULT_MASKS_DIR),
            bias_corrected: root.join(DEFAULT_BIAS_CORRECTED_DIR),
            manifest: root.join(DEFAULT_MANIFEST_FILENAME),
        }
    }

    /// Replace defaults with any paths set in the config file.
    pub fn with_overrides(self, paths: &PathsConfig) -> Self {
        Self {
            images: paths.images.clone().unwrap_or(self.images),
            masks: paths.masks.clone().unwrap_or(self.masks),
            bias_corrected: paths.bias_corrected.clone().unwrap_or(self.bias_corrected),
            manifest: paths.manifest.clone().unwrap_or(self.manifest),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub converter: String,
    pub skull_stripper: String,
    pub bias_corrector: String,
    pub extractor: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            converter: DEFAULT_CONVERTER.to_string(),
            skull_stripper: DEFAULT_SKULL_STRIPPER.to_string(),
            bias_corrector: DEFAULT_BIAS_CORRECTOR.to_string(),
            extractor: DEFAULT_EXTRACTOR.to_string(),
        }
    }
}

/// Installation settings for the skull-stripping/bias-correction toolkit.
/// Applied to each spawned command, never to the current process.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolEnvironment {
    /// Toolkit installation root, exported as `FSLDIR`.
    pub root: Option<PathBuf>,
    /// Exported as `FSLOUTPUTTYPE`.
    pub output_type: String,
}

impl Default for ToolEnvironment {
    fn default() -> Self {
        Self {
            root: None,
            output_type: DEFAULT_OUTPUT_TYPE.to_string(),
        }
    }
}

impl ToolEnvironment {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Executable directory of the toolkit, if a root is configured.
    pub fn bin_dir(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join("bin"))
    }

    /// The `PATH` a child should see: the inherited search path with the toolkit's
    /// executable directory appended.
    pub fn search_path(&self) -> Option<OsString> {
        let bin_dir = self.bin_dir()?;
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let paths = std::env::split_paths(&inherited)
            .chain(std::iter::once(bin_dir))
            .collect::<Vec<_>>();
        std::env::join_paths(paths).ok()
    }

    /// Environment variables to set on a child process.
    pub fn vars(&self) -> Vec<(&'static str, OsString)> {
        let mut vars = vec![("FSLOUTPUTTYPE", OsString::from(&self.output_type))];
        if let Some(root) = &self.root {
            vars.push(("FSLDIR", root.clone().into_os_string()));
        }
        if let Some(path) = self.search_path() {
            vars.push(("PATH", path));
        }
        vars
    }

    pub fn apply(&self, command: &mut Command) {
        command.envs(self.vars());
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SkullStripParams {
    pub fractional_threshold: f32,
    pub gradient_threshold: f32,
}

impl Default for SkullStripParams {
    fn default() -> Self {
        Self {
            fractional_threshold: DEFAULT_FRACTIONAL_THRESHOLD,
            gradient_threshold: DEFAULT_GRADIENT_THRESHOLD,
        }
    }
}

/// Settings for manifest assembly.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestOptions {
    pub study: String,
    pub label: String,
    /// Image filenames to leave out of the manifest.
    pub exclude: Vec<String>,
    /// Observed image filename -> filename used for parsing and pairing.
    pub renames: BTreeMap<String, String>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            study: DEFAULT_STUDY_LABEL.to_string(),
            label: DEFAULT_ROI_LABEL.to_string(),
            exclude: Vec::new(),
            renames: BTreeMap::new(),
        }
    }
}

impl ManifestOptions {
    /// Name an observed image filename should be parsed and paired under, or `None` if it
    /// is excluded.
    pub fn resolve_name<'a>(&'a self, observed: &'a str) -> Option<&'a str> {
        if self.exclude.iter().any(|e| e == observed) {
            return None;
        }
        Some(
            self.renames
                .get(observed)
                .map(|s| s.as_str())
                .unwrap_or(observed),
        )
    }
}
