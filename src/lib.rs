pub mod config;
pub mod discover;
pub mod errors;
pub mod file;
pub mod manifest;
pub mod pipeline;
pub mod tool;

pub use config::*;
pub use discover::*;
pub use pipeline::*;
pub use tool::*;
