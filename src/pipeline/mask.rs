use std::path::{Path, PathBuf};

use super::{run_stage, ItemStatus, Stage, StageReport};
use crate::tool::SkullStripper;

/// Skull-strip every volume, writing brain masks to `masks_dir`.
pub fn generate_masks(
    stripper: &SkullStripper,
    volumes: Vec<PathBuf>,
    masks_dir: &Path,
    skip_existing: bool,
) -> StageReport {
    run_stage(Stage::Mask, volumes, |volume| {
        let mask = SkullStripper::mask_output(volume, masks_dir)?;
        if skip_existing && mask.is_file() {
            tracing::debug!("Skipping {}, mask exists", volume.display());
            return Ok(ItemStatus::Skipped(vec![mask]));
        }
        stripper
            .strip(volume, masks_dir)
            .map(|mask| ItemStatus::Completed(vec![mask]))
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{SkullStripParams, ToolEnvironment};
    use crate::tool::tests::{write_stub, SKULL_STRIPPER_STUB};
    use std::fs;

    #[test]
    fn test_generate_masks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stub = write_stub(temp_dir.path(), "strip", SKULL_STRIPPER_STUB);
        let stripper = SkullStripper::new(
            stub.to_str().unwrap(),
            SkullStripParams::default(),
            ToolEnvironment::default(),
        );
        let volumes = vec![temp_dir.path().join("A.nii.gz"), temp_dir.path().join("B.nii.gz")];
        for volume in &volumes {
            fs::write(volume, "volume").unwrap();
        }
        let masks = temp_dir.path().join("masks");

        let report = generate_masks(&stripper, volumes.clone(), &masks, false);
        assert_eq!(report.num_completed(), 2);
        assert_eq!(
            report.outputs(),
            vec![masks.join("A_mask_mask.nii.gz"), masks.join("B_mask_mask.nii.gz")]
        );

        let report = generate_masks(&stripper, volumes, &masks, true);
        assert_eq!(report.num_skipped(), 2);
    }
}
