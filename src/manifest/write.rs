use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use snafu::ResultExt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::ManifestEntry;
use crate::errors::manifest::{
    ArrowSnafu, CsvSnafu, IOSnafu, InvalidOutputExtensionSnafu, ParquetSnafu,
};
use crate::errors::ManifestError;

pub const COLUMNS: [&str; 7] = [
    "Study",
    "Patient",
    "Label",
    "Date",
    "Description",
    "Image",
    "Mask",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn from_extension(path: &Path) -> Result<Self, ManifestError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("csv") => Ok(OutputFormat::Csv),
            Some("parquet") => Ok(OutputFormat::Parquet),
            _ => InvalidOutputExtensionSnafu {
                path,
                supported: vec!["csv", "parquet"],
            }
            .fail(),
        }
    }
}

fn write_manifest_csv(entries: &[ManifestEntry], dest: &Path) -> Result<(), ManifestError> {
    let mut writer = csv::Writer::from_path(dest).context(CsvSnafu)?;
    if entries.is_empty() {
        writer.write_record(COLUMNS).context(CsvSnafu)?;
    }
    for entry in entries {
        writer.serialize(entry).context(CsvSnafu)?;
    }
    writer.flush().context(IOSnafu { path: dest })?;
    Ok(())
}

fn write_manifest_parquet(entries: &[ManifestEntry], dest: &Path) -> Result<(), ManifestError> {
    let column = |f: fn(&ManifestEntry) -> String| -> ArrayRef {
        Arc::new(StringArray::from(entries.iter().map(f).collect::<Vec<_>>()))
    };
    let arrays = vec![
        column(|e| e.study().to_string()),
        column(|e| e.patient().to_string()),
        column(|e| e.label().to_string()),
        column(|e| e.date().to_string()),
        column(|e| e.description().to_string()),
        column(|e| e.image().display().to_string()),
        column(|e| e.mask().display().to_string()),
    ];
    let schema = Schema::new(
        COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, false))
            .collect::<Vec<_>>(),
    );
    let batch = RecordBatch::try_new(Arc::new(schema), arrays).context(ArrowSnafu)?;

    let file = File::create(dest).context(IOSnafu { path: dest })?;
    let props = WriterProperties::builder().build();
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).context(ParquetSnafu)?;
    writer.write(&batch).context(ParquetSnafu)?;
    writer.close().context(ParquetSnafu)?;
    Ok(())
}

/// Write manifest entries to `dest`. The format is chosen by extension: `.csv` or `.parquet`.
/// Both formats carry a header and no index column.
pub fn write_manifest(entries: &[ManifestEntry], dest: &Path) -> Result<(), ManifestError> {
    let format = OutputFormat::from_extension(dest)?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context(IOSnafu { path: parent })?;
    }
    match format {
        OutputFormat::Csv => write_manifest_csv(entries, dest),
        OutputFormat::Parquet => write_manifest_parquet(entries, dest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManifestOptions;
    use crate::manifest::VolumeName;
    use rstest::rstest;
    use tempfile::TempDir;

    fn entries() -> Vec<ManifestEntry> {
        let options = ManifestOptions::default();
        vec![
            ManifestEntry::new(
                &options,
                VolumeName::parse_stem("SOLID-001 - 2019_JAN_01 - AX, T1").unwrap(),
                "/data/bias_corrected/a_biascorr_restore.nii.gz",
                "/data/masks/a_mask_mask.nii.gz",
            ),
            ManifestEntry::new(
                &options,
                VolumeName::parse_stem("SOLID-002_-_2019_FEB_02_-_FLAIR").unwrap(),
                "/data/bias_corrected/b_biascorr_restore.nii.gz",
                "/data/masks/b_mask_mask.nii.gz",
            ),
        ]
    }

    #[rstest]
    #[case("manifest.csv", Some(OutputFormat::Csv))]
    #[case("manifest.parquet", Some(OutputFormat::Parquet))]
    #[case("manifest.txt", None)]
    #[case("manifest", None)]
    fn test_output_format(#[case] path: &str, #[case] expected: Option<OutputFormat>) {
        let format = OutputFormat::from_extension(Path::new(path)).ok();
        assert_eq!(format, expected);
    }

    #[test]
    fn test_write_csv() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out").join("manifest.csv");
        write_manifest(&entries(), &dest).unwrap();

        let mut reader = csv::Reader::from_path(&dest).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), COLUMNS);

        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].iter().collect::<Vec<_>>(),
            vec![
                "SOLID",
                "SOLID-001",
                "1",
                "2019_JAN_01",
                "AX, T1",
                "/data/bias_corrected/a_biascorr_restore.nii.gz",
                "/data/masks/a_mask_mask.nii.gz"
            ]
        );
        assert_eq!(&rows[1][4], "FLAIR");
    }

    #[test]
    fn test_write_empty_csv() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("manifest.csv");
        write_manifest(&[], &dest).unwrap();

        let contents = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(contents, "Study,Patient,Label,Date,Description,Image,Mask\n");
    }

    #[test]
    fn test_write_parquet() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("manifest.parquet");
        write_manifest(&entries(), &dest).unwrap();

        let file = File::open(&dest).unwrap();
        let reader =
            parquet::arrow::arrow_reader::ParquetRecordBatchReader::try_new(file, 1024).unwrap();
        let batch = reader.into_iter().next().unwrap().unwrap();

        let schema = batch.schema();
        for field in COLUMNS {
            assert!(schema.field_with_name(field).is_ok());
        }
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn test_write_invalid_extension() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("manifest.json");
        let result = write_manifest(&entries(), &dest);
        assert!(matches!(
            result,
            Err(ManifestError::InvalidOutputExtension { .. })
        ));
    }
}
