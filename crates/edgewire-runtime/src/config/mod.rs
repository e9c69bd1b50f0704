//! Layered configuration for the edge server.
//!
//! Defaults, config files, `EDGEWIRE_*` environment variables and
//! programmatic overrides are merged by [`ConfigLoader`] and checked by
//! [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ClusterConfig, EdgeConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ServerConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
