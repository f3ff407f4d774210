use itertools::Itertools;

use super::{run_stage, ItemStatus, Stage, StageReport};
use crate::discover::{StudyKind, StudyUnit};
use crate::tool::ArchiveExtractor;

/// Extract archived studies next to their archives.
///
/// Returns the studies to convert: directories unchanged, archives replaced by their extracted
/// directory. Archives that fail to extract are dropped from the list and reported.
pub fn extract_archives(
    extractor: &ArchiveExtractor,
    studies: Vec<StudyUnit>,
    skip_existing: bool,
) -> (Vec<StudyUnit>, StageReport) {
    let (archives, mut directories): (Vec<_>, Vec<_>) = studies
        .into_iter()
        .partition(|unit| unit.kind() == StudyKind::Archive);

    let report = run_stage(Stage::Extract, archives.clone(), |unit| {
        let dir = unit.extraction_dir();
        if skip_existing && dir.is_dir() {
            tracing::debug!("Skipping {}, already extracted", unit.path().display());
            return Ok(ItemStatus::Skipped(vec![dir]));
        }
        extractor
            .extract(unit)
            .map(|extracted| ItemStatus::Completed(vec![extracted.path().clone()]))
    });

    let extracted = archives
        .iter()
        .zip(report.outcomes())
        .filter(|(_, outcome)| outcome.is_ok())
        .map(|(unit, _)| unit.extracted());
    directories.extend(extracted);

    // An extracted archive may share its name with an existing study directory
    let studies = directories.into_iter().sorted().dedup().collect();
    (studies, report)
}
