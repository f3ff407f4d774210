pub mod config;
pub mod manifest;
pub mod tool;

pub use config::ConfigError;
pub use manifest::ManifestError;
pub use tool::ToolError;
