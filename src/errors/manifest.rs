use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ManifestError {
    #[snafu(display("not a directory: {}", path.display()))]
    InvalidDirectory { path: PathBuf },

    #[snafu(display("IO error on {}: {:?}", path.display(), source))]
    IO {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Error writing CSV: {:?}", source))]
    Csv {
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("Arrow error: {:?}", source))]
    Arrow {
        #[snafu(source(from(ArrowError, Box::new)))]
        source: Box<ArrowError>,
    },

    #[snafu(display("Parquet error: {:?}", source))]
    Parquet {
        #[snafu(source(from(ParquetError, Box::new)))]
        source: Box<ParquetError>,
    },

    #[snafu(display("Invalid output extension for {}, supported extensions: {}", path.display(), supported.join(", ")))]
    InvalidOutputExtension {
        path: PathBuf,
        supported: Vec<&'static str>,
    },

    #[snafu(display(
        "manifest has {} unmatched image(s), {} unmatched mask(s) and {} malformed name(s)",
        unmatched_images,
        unmatched_masks,
        malformed
    ))]
    Anomalies {
        unmatched_images: usize,
        unmatched_masks: usize,
        malformed: usize,
    },
}
