/// Suffix of a bias-corrected image as written by the corrector.
pub const IMAGE_FILE_SUFFIX: &str = "_biascorr_restore.nii.gz";
/// Suffix of a binary brain mask as written by the skull-stripper.
pub const MASK_FILE_SUFFIX: &str = "_mask_mask.nii.gz";

/// Field separators in a volume name. The converter may write `" - "` with its spaces
/// replaced by underscores.
pub const SEPARATORS: [&str; 2] = [" - ", "_-_"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("{name} does not end with {suffix}")]
    MissingSuffix { name: String, suffix: &'static str },

    #[error("{name} does not split into patient, date and description")]
    MissingFields { name: String },
}

/// Pairing key of a bias-corrected image: its file name without [`IMAGE_FILE_SUFFIX`].
pub fn image_key(name: &str) -> Result<&str, NameError> {
    strip_key(name, IMAGE_FILE_SUFFIX)
}

/// Pairing key of a mask: its file name without [`MASK_FILE_SUFFIX`].
pub fn mask_key(name: &str) -> Result<&str, NameError> {
    strip_key(name, MASK_FILE_SUFFIX)
}

fn strip_key<'a>(name: &'a str, suffix: &'static str) -> Result<&'a str, NameError> {
    name.strip_suffix(suffix)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| NameError::MissingSuffix {
            name: name.to_string(),
            suffix,
        })
}

/// Metadata carried in a volume name of the form `{patient} - {date} - {description}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeName {
    pub patient: String,
    pub date: String,
    pub description: String,
}

impl VolumeName {
    /// Parse a volume stem. Anything after the second separator belongs to the description.
    pub fn parse_stem(stem: &str) -> Result<Self, NameError> {
        let missing = || NameError::MissingFields {
            name: stem.to_string(),
        };
        let separator = SEPARATORS
            .iter()
            .find(|sep| stem.contains(*sep))
            .ok_or_else(missing)?;

        let mut fields = stem.splitn(3, separator);
        match (fields.next(), fields.next(), fields.next()) {
            (Some(patient), Some(date), Some(description))
                if !patient.is_empty() && !date.is_empty() && !description.is_empty() =>
            {
                Ok(Self {
                    patient: patient.to_string(),
                    date: date.to_string(),
                    description: description.to_string(),
                })
            }
            _ => Err(missing()),
        }
    }

    /// Parse the file name of a bias-corrected image.
    pub fn parse_image(name: &str) -> Result<Self, NameError> {
        Self::parse_stem(image_key(name)?)
    }
}
