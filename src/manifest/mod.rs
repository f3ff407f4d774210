//! Pairs bias-corrected images with brain masks and describes each pair for feature extraction.
//!
//! Images and masks are matched on the volume stem both were derived from, never on their
//! position in a directory listing. Anything that cannot be paired is reported rather than
//! written.
use serde::Serialize;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ManifestOptions;
use crate::errors::manifest::{AnomaliesSnafu, IOSnafu, InvalidDirectorySnafu};
use crate::errors::ManifestError;
use crate::file::VolumeFileOperations;

pub mod name;
pub mod write;

pub use name::{
    image_key, mask_key, NameError, VolumeName, IMAGE_FILE_SUFFIX, MASK_FILE_SUFFIX,
};
pub use write::{write_manifest, OutputFormat};

/// One row of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    #[serde(rename = "Study")]
    study: String,
    #[serde(rename = "Patient")]
    patient: String,
    #[serde(rename = "Label")]
    label: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Description")]
    description: String,
    #[serde(rename = "Image")]
    image: PathBuf,
    #[serde(rename = "Mask")]
    mask: PathBuf,
}

impl ManifestEntry {
    pub fn new<P: AsRef<Path>>(
        options: &ManifestOptions,
        name: VolumeName,
        image: P,
        mask: P,
    ) -> Self {
        Self {
            study: options.study.clone(),
            patient: name.patient,
            label: options.label.clone(),
            date: name.date,
            description: name.description,
            image: PathBuf::from(image.as_ref()),
            mask: PathBuf::from(mask.as_ref()),
        }
    }

    pub fn study(&self) -> &str {
        &self.study
    }

    pub fn patient(&self) -> &str {
        &self.patient
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn image(&self) -> &PathBuf {
        &self.image
    }

    pub fn mask(&self) -> &PathBuf {
        &self.mask
    }
}

/// Result of pairing a directory of images with a directory of masks.
#[derive(Debug, Default)]
pub struct ManifestReport {
    pub entries: Vec<ManifestEntry>,
    pub unmatched_images: Vec<PathBuf>,
    pub unmatched_masks: Vec<PathBuf>,
    pub malformed: Vec<(PathBuf, NameError)>,
    pub excluded: Vec<PathBuf>,
}

impl ManifestReport {
    pub fn num_anomalies(&self) -> usize {
        self.unmatched_images.len() + self.unmatched_masks.len() + self.malformed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.num_anomalies() == 0
    }

    pub fn log_anomalies(&self) {
        for image in &self.unmatched_images {
            tracing::warn!("No mask found for image {}", image.display());
        }
        for mask in &self.unmatched_masks {
            tracing::warn!("No image found for mask {}", mask.display());
        }
        for (path, e) in &self.malformed {
            tracing::warn!("Skipping {}: {}", path.display(), e);
        }
        for path in &self.excluded {
            tracing::debug!("Excluded {}", path.display());
        }
    }

    /// Fail if anything could not be paired.
    pub fn check(&self) -> Result<(), ManifestError> {
        match self.is_clean() {
            true => Ok(()),
            false => AnomaliesSnafu {
                unmatched_images: self.unmatched_images.len(),
                unmatched_masks: self.unmatched_masks.len(),
                malformed: self.malformed.len(),
            }
            .fail(),
        }
    }
}

fn absolute_dir(path: &Path) -> Result<PathBuf, ManifestError> {
    if !path.is_dir() {
        return InvalidDirectorySnafu { path }.fail();
    }
    std::path::absolute(path).context(IOSnafu { path })
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

/// Pair bias-corrected images in `images_dir` with masks in `masks_dir`.
///
/// Entries are ordered by image file name. Images listed in `options.exclude` are skipped, and
/// `options.renames` substitutes the name an image is parsed and paired under.
pub fn build_manifest<P: AsRef<Path>>(
    images_dir: P,
    masks_dir: P,
    options: &ManifestOptions,
) -> Result<ManifestReport, ManifestError> {
    let images_dir = absolute_dir(images_dir.as_ref())?;
    let masks_dir = absolute_dir(masks_dir.as_ref())?;

    let images = images_dir
        .find_with_suffix(IMAGE_FILE_SUFFIX)
        .context(IOSnafu { path: &images_dir })?;
    let masks = masks_dir
        .find_with_suffix(MASK_FILE_SUFFIX)
        .context(IOSnafu { path: &masks_dir })?;
    tracing::info!(
        "Found {} images and {} masks",
        images.len(),
        masks.len()
    );

    let mut report = ManifestReport::default();
    let mut masks_by_key = BTreeMap::new();
    for mask in masks {
        match mask_key(file_name(&mask)) {
            Ok(key) => {
                masks_by_key.insert(key.to_string(), mask);
            }
            Err(e) => report.malformed.push((mask, e)),
        }
    }

    for image in images {
        let Some(name) = options.resolve_name(file_name(&image)) else {
            report.excluded.push(image);
            continue;
        };
        let parsed = image_key(name).and_then(|key| {
            VolumeName::parse_image(name).map(|volume_name| (key.to_string(), volume_name))
        });
        match parsed {
            Ok((key, volume_name)) => match masks_by_key.remove(&key) {
                Some(mask) => report
                    .entries
                    .push(ManifestEntry::new(options, volume_name, &image, &mask)),
                None => report.unmatched_images.push(image),
            },
            Err(e) => report.malformed.push((image, e)),
        }
    }
    report.unmatched_masks = masks_by_key.into_values().collect();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    type IOResult<T> = Result<T, std::io::Error>;

    const STEMS: [&str; 3] = [
        "SOLID-001_-_2019_JAN_01_-_AX_T1",
        "SOLID-002_-_2019_FEB_02_-_AX_FLAIR",
        "SOLID-004_-_2019_APR_13_-_AXIAL_FLAIR+C",
    ];

    fn setup_test_dirs(images: &[&str], masks: &[&str]) -> IOResult<(TempDir, PathBuf, PathBuf)> {
        let temp_dir = TempDir::new()?;
        let images_dir = temp_dir.path().join("bias_corrected");
        let masks_dir = temp_dir.path().join("masks");
        fs::create_dir(&images_dir)?;
        fs::create_dir(&masks_dir)?;

        for stem in images {
            fs::write(images_dir.join(format!("{stem}{IMAGE_FILE_SUFFIX}")), "image")?;
            // Intermediate corrector output that must not be picked up
            fs::write(images_dir.join(format!("{stem}_biascorr_seg.nii.gz")), "seg")?;
        }
        for stem in masks {
            fs::write(masks_dir.join(format!("{stem}{MASK_FILE_SUFFIX}")), "mask")?;
            // Skull-stripped brain, not the mask
            fs::write(masks_dir.join(format!("{stem}_mask.nii.gz")), "brain")?;
        }
        Ok((temp_dir, images_dir, masks_dir))
    }

    #[test]
    fn test_build_manifest() -> IOResult<()> {
        let (_temp_dir, images_dir, masks_dir) = setup_test_dirs(&STEMS, &STEMS)?;

        let report = build_manifest(&images_dir, &masks_dir, &ManifestOptions::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.entries.len(), 3);

        let entry = &report.entries[2];
        assert_eq!(entry.study(), "SOLID");
        assert_eq!(entry.label(), "1");
        assert_eq!(entry.patient(), "SOLID-004");
        assert_eq!(entry.date(), "2019_APR_13");
        assert_eq!(entry.description(), "AXIAL_FLAIR+C");
        assert!(entry.image().is_absolute());
        assert_eq!(
            entry.image().file_name().unwrap(),
            "SOLID-004_-_2019_APR_13_-_AXIAL_FLAIR+C_biascorr_restore.nii.gz"
        );
        assert_eq!(
            entry.mask().file_name().unwrap(),
            "SOLID-004_-_2019_APR_13_-_AXIAL_FLAIR+C_mask_mask.nii.gz"
        );
        Ok(())
    }

    #[rstest]
    #[case::missing_mask(&STEMS, &STEMS[..2], 1, 0)]
    #[case::missing_image(&STEMS[1..], &STEMS, 0, 1)]
    #[case::disjoint(&STEMS[..1], &STEMS[1..], 1, 2)]
    fn test_unmatched_are_flagged(
        #[case] images: &[&str],
        #[case] masks: &[&str],
        #[case] unmatched_images: usize,
        #[case] unmatched_masks: usize,
    ) -> IOResult<()> {
        let (_temp_dir, images_dir, masks_dir) = setup_test_dirs(images, masks)?;

        let report = build_manifest(&images_dir, &masks_dir, &ManifestOptions::default()).unwrap();
        assert_eq!(report.unmatched_images.len(), unmatched_images);
        assert_eq!(report.unmatched_masks.len(), unmatched_masks);
        assert!(matches!(
            report.check(),
            Err(ManifestError::Anomalies { .. })
        ));

        // Every written pair still belongs together
        for entry in &report.entries {
            let image = image_key(file_name(entry.image())).unwrap();
            let mask = mask_key(file_name(entry.mask())).unwrap();
            assert_eq!(image, mask);
        }
        Ok(())
    }

    #[test]
    fn test_sorted_lists_would_mispair() -> IOResult<()> {
        // A missing mask shifts positional pairing; keyed pairing keeps the rest correct
        let (_temp_dir, images_dir, masks_dir) = setup_test_dirs(&STEMS, &[STEMS[0], STEMS[2]])?;

        let report = build_manifest(&images_dir, &masks_dir, &ManifestOptions::default()).unwrap();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[1].patient(), "SOLID-004");
        assert!(report.entries[1]
            .mask()
            .to_string_lossy()
            .contains("SOLID-004"));
        assert_eq!(report.unmatched_images.len(), 1);
        Ok(())
    }

    #[test]
    fn test_malformed_name() -> IOResult<()> {
        let (_temp_dir, images_dir, masks_dir) = setup_test_dirs(&["NOSEPARATOR"], &["NOSEPARATOR"])?;

        let report = build_manifest(&images_dir, &masks_dir, &ManifestOptions::default()).unwrap();
        assert!(report.entries.is_empty());
        assert_eq!(report.malformed.len(), 1);
        assert!(matches!(
            report.malformed[0].1,
            NameError::MissingFields { .. }
        ));
        assert!(report.check().is_err());
        Ok(())
    }

    #[test]
    fn test_renames_and_exclusions() -> IOResult<()> {
        let (_temp_dir, images_dir, masks_dir) =
            setup_test_dirs(&["SOLID-004_-_2019_APR_13_-_AXIAL_FLAIR+C_", STEMS[0], STEMS[1]], &[STEMS[0], STEMS[2]])?;

        let options = ManifestOptions {
            exclude: vec![format!("{}{IMAGE_FILE_SUFFIX}", STEMS[1])],
            renames: BTreeMap::from([(
                format!("SOLID-004_-_2019_APR_13_-_AXIAL_FLAIR+C_{IMAGE_FILE_SUFFIX}"),
                format!("{}{IMAGE_FILE_SUFFIX}", STEMS[2]),
            )]),
            ..Default::default()
        };
        let report = build_manifest(&images_dir, &masks_dir, &options).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.entries.len(), 2);

        let renamed = report
            .entries
            .iter()
            .find(|e| e.patient() == "SOLID-004")
            .unwrap();
        assert_eq!(renamed.description(), "AXIAL_FLAIR+C");
        // The path still points at the file on disk
        assert!(renamed.image().is_file());
        Ok(())
    }

    #[test]
    fn test_invalid_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = build_manifest(
            temp_dir.path().join("missing"),
            temp_dir.path().to_path_buf(),
            &ManifestOptions::default(),
        );
        assert!(matches!(
            result,
            Err(ManifestError::InvalidDirectory { .. })
        ));
    }
}
