use itertools::Itertools;
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

use crate::file::ARCHIVE_SUFFIX;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DiscoverError {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("unable to list {}: {:?}", path.display(), source))]
    ReadDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StudyKind {
    Directory,
    Archive,
}

/// A single study to be converted, found at `{root}/{patient}/{study}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StudyUnit {
    patient: String,
    study: String,
    path: PathBuf,
    kind: StudyKind,
}

impl AsRef<Path> for StudyUnit {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl StudyUnit {
    pub fn new<P: AsRef<Path>>(patient: &str, study: &str, path: P, kind: StudyKind) -> Self {
        Self {
            patient: patient.to_string(),
            study: study.to_string(),
            path: PathBuf::from(path.as_ref()),
            kind,
        }
    }

    /// Build a study unit from a path of the form `{root}/{patient}/{study}`.
    /// Returns `None` if the entry is neither a directory nor a `.zip` archive.
    pub fn try_from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        let name = path.file_name()?.to_str()?;
        let patient = path.parent()?.file_name()?.to_str()?;
        if path.is_dir() {
            Some(Self::new(patient, name, path, StudyKind::Directory))
        } else if let Some(stem) = name.strip_suffix(ARCHIVE_SUFFIX) {
            Some(Self::new(patient, stem, path, StudyKind::Archive))
        } else {
            None
        }
    }

    pub fn patient(&self) -> &str {
        &self.patient
    }

    pub fn study(&self) -> &str {
        &self.study
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn kind(&self) -> StudyKind {
        self.kind
    }

    /// Name for the converted volume, `"{patient} - {study}"`.
    pub fn output_name(&self) -> String {
        format!("{} - {}", self.patient, self.study)
    }

    /// Directory an archive is extracted into: a sibling named after the archive stem.
    pub fn extraction_dir(&self) -> PathBuf {
        self.path.with_file_name(&self.study)
    }

    /// The same study, pointing at its extracted directory.
    pub fn extracted(&self) -> Self {
        Self {
            path: self.extraction_dir(),
            kind: StudyKind::Directory,
            ..self.clone()
        }
    }
}

fn list_dir(path: &Path) -> Result<Vec<PathBuf>, DiscoverError> {
    std::fs::read_dir(path)
        .context(ReadDirSnafu { path })?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .context(ReadDirSnafu { path })
}

/// Find every study unit under `root`. The root is expected to contain one directory per patient,
/// each holding study directories or `.zip` archives. Files at the patient level are ignored.
pub fn discover_studies<P: AsRef<Path>>(root: P) -> Result<Vec<StudyUnit>, DiscoverError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return InvalidSourcePathSnafu { path: root }.fail();
    }

    let patients = list_dir(root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();
    tracing::info!("Number of patients found: {}", patients.len());

    let mut studies = Vec::new();
    for patient in patients {
        let units = list_dir(&patient)?
            .into_iter()
            .filter_map(StudyUnit::try_from_path);
        studies.extend(units);
    }

    Ok(studies
        .into_iter()
        .sorted_by(|a, b| {
            a.patient()
                .cmp(b.patient())
                .then(a.study().cmp(b.study()))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    #[test]
    fn test_output_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let study = temp_dir.path().join("P1").join("StudyA");
        fs::create_dir_all(&study).unwrap();

        let unit = StudyUnit::try_from_path(&study).unwrap();
        assert_eq!(unit.patient(), "P1");
        assert_eq!(unit.study(), "StudyA");
        assert_eq!(unit.kind(), StudyKind::Directory);
        assert_eq!(unit.output_name(), "P1 - StudyA");
    }

    #[rstest]
    #[case::archive("StudyB.zip", Some(StudyKind::Archive))]
    #[case::plain_file("notes.txt", None)]
    fn test_study_unit_from_file(#[case] filename: &str, #[case] expected: Option<StudyKind>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let patient = temp_dir.path().join("P2");
        fs::create_dir(&patient).unwrap();
        let path = patient.join(filename);
        fs::write(&path, "test").unwrap();

        let unit = StudyUnit::try_from_path(&path);
        assert_eq!(unit.as_ref().map(|u| u.kind()), expected);
        if let Some(unit) = unit {
            assert_eq!(unit.output_name(), "P2 - StudyB");
            assert_eq!(unit.extraction_dir(), patient.join("StudyB"));
            let extracted = unit.extracted();
            assert_eq!(extracted.kind(), StudyKind::Directory);
            assert_eq!(extracted.path(), &patient.join("StudyB"));
        }
    }

    #[test]
    fn test_discover_studies() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("P2").join("Study2")).unwrap();
        fs::create_dir_all(root.join("P1").join("StudyB")).unwrap();
        fs::create_dir_all(root.join("P1").join("StudyA")).unwrap();
        fs::write(root.join("P1").join("StudyC.zip"), "zip").unwrap();
        fs::write(root.join("P1").join("readme.txt"), "ignored").unwrap();
        fs::write(root.join("stray.txt"), "ignored").unwrap();

        let studies = discover_studies(root).unwrap();
        let names = studies.iter().map(|s| s.output_name()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["P1 - StudyA", "P1 - StudyB", "P1 - StudyC", "P2 - Study2"]
        );
        assert_eq!(studies[2].kind(), StudyKind::Archive);
    }

    #[test]
    fn test_discover_invalid_root() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let result = discover_studies(temp_file.path());
        assert!(matches!(
            result,
            Err(DiscoverError::InvalidSourcePath { .. })
        ));
    }
}
