use std::path::Path;

use super::{run_stage, ItemStatus, Stage, StageReport};
use crate::discover::StudyUnit;
use crate::tool::Converter;

/// Convert every study unit into a volume in `images_dir`.
pub fn convert_studies(
    converter: &Converter,
    studies: Vec<StudyUnit>,
    images_dir: &Path,
    skip_existing: bool,
) -> StageReport {
    run_stage(Stage::Convert, studies, |unit| {
        let expected = Converter::expected_output(unit, images_dir);
        if skip_existing && expected.is_file() {
            tracing::debug!("Skipping {}, already converted", unit.output_name());
            return Ok(ItemStatus::Skipped(vec![expected]));
        }
        converter
            .convert(unit, images_dir)
            .map(ItemStatus::Completed)
    })
}
