//! Edgewire Runtime - orchestration layer of the Edgewire edge server.
//!
//! This crate provides:
//! - Layered configuration (`EdgeConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`, `init_from_config`)
//! - The server lifecycle (`EdgeServer`): registration, cluster membership,
//!   gateway start and graceful shutdown
//!
//! ```ignore
//! use edgewire_runtime::EdgeServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = EdgeServer::builder()
//!         .gateway(my_gateway)
//!         .service(my_service)
//!         .local_cluster()
//!         .build()?;
//!
//!     // Runs until Ctrl+C or SIGTERM
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `toml-config`: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use config::{
    ClusterConfig, ConfigError, ConfigLoader, ConfigResult, EdgeConfig, LoggingConfig,
    ServerConfig, load_config, load_config_from_file,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};
pub use server::{EdgeServer, EdgeServerBuilder, shutdown_signal};

// Re-export tracing for use by service crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for service authors.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
