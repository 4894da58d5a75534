//! Run configuration: an optional `metrics-gen.toml` merged with CLI flags.

pub mod loader;
pub mod schema;

pub use loader::{check, load_from_path, load_from_str, parse_from_path, parse_from_str, ConfigError};
pub use schema::{PatcherConfig, ValidationError, ValidationIssue};

/// File name looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "metrics-gen.toml";
