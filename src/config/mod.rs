//! Configuration sources and resolution.

/// File-based sources (.env and flattened YAML).
mod file;
/// Merge and typed access.
mod resolver;

pub use file::{ConfigFileError, read_config_file};
pub use resolver::{ConfigValue, Configuration, MissingKey};
