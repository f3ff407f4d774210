use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use std::path::{Path, PathBuf};

pub const VOLUME_SUFFIX: &str = ".nii.gz";
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// Suffix requested from the skull-stripper. The tool appends it once more for the binary mask.
pub const MASK_SUFFIX: &str = "_mask";
/// Suffix requested from the bias corrector.
pub const BIAS_CORRECTED_SUFFIX: &str = "_biascorr";
/// Suffix the bias corrector appends to the requested name for the corrected image.
pub const RESTORE_SUFFIX: &str = "_restore";

type IOResult<T> = Result<T, std::io::Error>;

pub fn default_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec})",
            )
            .unwrap(),
    );
    pb
}

/// Strip `suffix` from the file name of `path`, returning what remains.
/// Returns `None` if the path has no UTF-8 file name or the name does not end with `suffix`.
pub fn strip_name_suffix<'a>(path: &'a Path, suffix: &str) -> Option<&'a str> {
    path.file_name()?
        .to_str()?
        .strip_suffix(suffix)
        .filter(|stem| !stem.is_empty())
}

pub trait VolumeFileOperations
where
    Self: AsRef<Path>,
{
    /// Check if a path names a compressed volume (`.nii.gz`).
    fn has_volume_extension(&self) -> bool {
        strip_name_suffix(self.as_ref(), VOLUME_SUFFIX).is_some()
    }

    /// Check if a path is an existing volume file.
    fn is_volume_file(&self) -> bool {
        self.as_ref().is_file() && self.has_volume_extension()
    }

    /// File name with the `.nii.gz` suffix removed.
    fn volume_stem(&self) -> Option<&str> {
        strip_name_suffix(self.as_ref(), VOLUME_SUFFIX)
    }

    /// File name the skull-stripper should be asked for, e.g. `X.nii.gz` -> `X_mask.nii.gz`.
    fn mask_name(&self) -> Option<String> {
        self.volume_stem()
            .map(|stem| format!("{stem}{MASK_SUFFIX}{VOLUME_SUFFIX}"))
    }

    /// File name the bias corrector should be asked for, e.g. `X.nii.gz` -> `X_biascorr.nii.gz`.
    fn bias_corrected_name(&self) -> Option<String> {
        self.volume_stem()
            .map(|stem| format!("{stem}{BIAS_CORRECTED_SUFFIX}{VOLUME_SUFFIX}"))
    }

    /// Find all volume files directly inside a directory, sorted by path.
    fn find_volumes(&self) -> IOResult<Vec<PathBuf>> {
        self.find_with_suffix(VOLUME_SUFFIX)
    }

    /// Find all files directly inside a directory whose name ends with `suffix`, sorted by path.
    /// Hidden and ignored files are listed like any other.
    fn find_with_suffix(&self, suffix: &str) -> IOResult<Vec<PathBuf>> {
        let dir = self.as_ref();
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Not a directory",
            ));
        }
        let entries = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<IOResult<Vec<_>>>()?;
        let result = entries
            .into_iter()
            .filter(|file| file.is_file() && strip_name_suffix(file, suffix).is_some())
            .sorted()
            .collect();
        Ok(result)
    }
}

impl<P: AsRef<Path>> VolumeFileOperations for P {}

/// Name of the binary mask the skull-stripper writes for a requested output name,
/// e.g. `X_mask.nii.gz` -> `X_mask_mask.nii.gz`.
pub fn binary_mask_name(requested: &str) -> Option<String> {
    requested
        .strip_suffix(VOLUME_SUFFIX)
        .map(|stem| format!("{stem}{MASK_SUFFIX}{VOLUME_SUFFIX}"))
}

/// Name of the corrected image the bias corrector writes for a requested output name,
/// e.g. `X_biascorr.nii.gz` -> `X_biascorr_restore.nii.gz`.
pub fn restored_name(requested: &str) -> Option<String> {
    requested
        .strip_suffix(VOLUME_SUFFIX)
        .map(|stem| format!("{stem}{RESTORE_SUFFIX}{VOLUME_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::volume("X.nii.gz", true)]
    #[case::nested("path/to/X.nii.gz", true)]
    #[case::uncompressed("X.nii", false)]
    #[case::gzip_only("X.gz", false)]
    #[case::suffix_only(".nii.gz", false)]
    #[case::no_extension("X", false)]
    fn test_has_volume_extension(#[case] path: &str, #[case] expected: bool) {
        let path = PathBuf::from(path);
        assert_eq!(path.has_volume_extension(), expected);
    }

    #[rstest]
    #[case("X.nii.gz", "X_mask.nii.gz")]
    #[case("P1 - StudyA.nii.gz", "P1 - StudyA_mask.nii.gz")]
    #[case("/out/images/a.b.nii.gz", "a.b_mask.nii.gz")]
    fn test_mask_name(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(PathBuf::from(path).mask_name().unwrap(), expected);
    }

    #[rstest]
    #[case("X.nii.gz", "X_biascorr.nii.gz")]
    #[case("P1 - StudyA.nii.gz", "P1 - StudyA_biascorr.nii.gz")]
    fn test_bias_corrected_name(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(PathBuf::from(path).bias_corrected_name().unwrap(), expected);
    }

    #[test]
    fn test_derived_names_require_volume() {
        let path = PathBuf::from("X.nii");
        assert!(path.mask_name().is_none());
        assert!(path.bias_corrected_name().is_none());
    }

    #[test]
    fn test_tool_output_names() {
        assert_eq!(
            binary_mask_name("X_mask.nii.gz").unwrap(),
            "X_mask_mask.nii.gz"
        );
        assert_eq!(
            restored_name("X_biascorr.nii.gz").unwrap(),
            "X_biascorr_restore.nii.gz"
        );
        assert!(restored_name("X_biascorr.nii").is_none());
    }

    #[test]
    fn test_find_volumes() {
        let temp_dir = tempfile::tempdir().unwrap();

        let volumes = vec![
            temp_dir.path().join("b.nii.gz"),
            temp_dir.path().join("a.nii.gz"),
        ];
        let other_files = vec![
            temp_dir.path().join("a.json"),
            temp_dir.path().join("c.nii"),
        ];
        for file in volumes.iter().chain(other_files.iter()) {
            std::fs::write(file, "test").unwrap();
        }

        // Nested volumes are not part of the directory listing
        let sub_dir = temp_dir.path().join("nested");
        std::fs::create_dir(&sub_dir).unwrap();
        std::fs::write(sub_dir.join("d.nii.gz"), "test").unwrap();

        let found = temp_dir.path().find_volumes().unwrap();
        assert_eq!(
            found,
            vec![
                temp_dir.path().join("a.nii.gz"),
                temp_dir.path().join("b.nii.gz")
            ]
        );
    }

    #[test]
    fn test_find_volumes_in_ignored_directory() {
        // Output folders often live inside a checkout that ignores volumes
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();
        std::fs::write(temp_dir.path().join(".gitignore"), "*.nii.gz\n").unwrap();
        let images = temp_dir.path().join("out").join("images");
        std::fs::create_dir_all(&images).unwrap();
        for name in ["a.nii.gz", "b.nii.gz", ".c.nii.gz"] {
            std::fs::write(images.join(name), "test").unwrap();
        }

        let found = images.find_volumes().unwrap();
        assert_eq!(
            found,
            vec![
                images.join(".c.nii.gz"),
                images.join("a.nii.gz"),
                images.join("b.nii.gz")
            ]
        );
    }

    #[test]
    fn test_find_volumes_not_a_directory() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        assert!(temp_file.path().find_volumes().is_err());
    }
}
