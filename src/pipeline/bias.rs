use std::path::{Path, PathBuf};

use super::{run_stage, ItemStatus, Stage, StageReport};
use crate::tool::BiasCorrector;

/// Bias-correct every volume, writing corrected images to `output_dir`.
pub fn correct_volumes(
    corrector: &BiasCorrector,
    volumes: Vec<PathBuf>,
    output_dir: &Path,
    skip_existing: bool,
) -> StageReport {
    run_stage(Stage::Bias, volumes, |volume| {
        let restored = BiasCorrector::restored_output(volume, output_dir)?;
        if skip_existing && restored.is_file() {
            tracing::debug!("Skipping {}, already corrected", volume.display());
            return Ok(ItemStatus::Skipped(vec![restored]));
        }
        corrector
            .correct(volume, output_dir)
            .map(|restored| ItemStatus::Completed(vec![restored]))
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ToolEnvironment;
    use crate::tool::tests::{write_stub, BIAS_CORRECTOR_STUB};
    use std::fs;

    #[test]
    fn test_correct_volumes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stub = write_stub(temp_dir.path(), "correct", BIAS_CORRECTOR_STUB);
        let corrector = BiasCorrector::new(stub.to_str().unwrap(), ToolEnvironment::default());
        let good = temp_dir.path().join("A.nii.gz");
        fs::write(&good, "volume").unwrap();
        // Listed but missing on disk, so the stub's copy fails
        let missing = temp_dir.path().join("B.nii.gz");
        let output = temp_dir.path().join("bias_corrected");

        let report = correct_volumes(&corrector, vec![good, missing], &output, false);
        assert_eq!(report.num_completed(), 1);
        assert_eq!(report.num_failed(), 1);
        assert_eq!(
            report.outputs(),
            vec![output.join("A_biascorr_restore.nii.gz")]
        );
    }
}
