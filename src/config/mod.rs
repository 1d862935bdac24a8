//! Configuration loading
//!
//! One TOML file, two accepted shapes: the `[[jobs]]` array and the legacy
//! top-level single-job keys. Missing or malformed input never fails
//! startup; the provider falls back to the built-in defaults and says so.

mod defaults;
mod load;

pub use defaults::BuiltinDefaults;
pub use load::{
    ConfigError, ConfigSource, DelayProfile, JobSpec, Pacing, RunConfiguration,
    DEFAULT_CONFIG_FILE, DEFAULT_LOG_FILE, DEFAULT_MARKER_FILE,
};
