use snafu::Snafu;
use std::path::PathBuf;
use std::process::ExitStatus;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ToolError {
    #[snafu(display("unable to launch {}: {:?}", program, source))]
    Spawn {
        program: String,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{} exited with {}: {}", program, status, stderr.trim()))]
    ExitStatus {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[snafu(display("{} did not produce expected output {}", program, path.display()))]
    MissingOutput { program: String, path: PathBuf },

    #[snafu(display("failed to create directory {}: {:?}", path.display(), source))]
    CreateDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("unable to list outputs in {}: {:?}", path.display(), source))]
    ListOutputs {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("unable to clear staging directory {}: {:?}", path.display(), source))]
    Staging {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("unable to move output to {}: {:?}", path.display(), source))]
    MoveOutput {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("input has no usable file name: {}", path.display()))]
    InvalidInput { path: PathBuf },
}
