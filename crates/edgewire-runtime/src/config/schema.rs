//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use edgewire_core::{ClusterMember, StoreClusterConfig};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EdgeConfig {
    /// Identity of this instance and request handling limits.
    #[serde(default)]
    pub server: ServerConfig,

    /// Membership heartbeat and inbox settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Server
// =============================================================================

/// Settings of this edge server instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Cluster-wide unique id. A random UUID is used when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// URLs under which peers and clients can reach this instance.
    #[serde(default)]
    pub advertised_urls: Vec<String>,

    /// Deadline of a forwarded request, from publish until eof.
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,

    /// Upper bound for stopping gateways and the cluster.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Idle contexts and envelopes kept for reuse.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: None,
            advertised_urls: Vec::new(),
            forward_timeout_ms: default_forward_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            pool_max_idle: default_pool_max_idle(),
        }
    }
}

impl ServerConfig {
    /// The configured id, or a freshly generated one.
    pub fn resolve_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Builds the member record announced to the cluster.
    pub fn to_member(&self) -> ClusterMember {
        ClusterMember::new(self.resolve_id(), self.advertised_urls.clone())
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_forward_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_ms() -> u64 {
    10000
}

fn default_pool_max_idle() -> usize {
    1024
}

// =============================================================================
// Cluster
// =============================================================================

/// Settings of the store-backed cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Liveness window of a member. Twice the heartbeat when absent.
    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// Capacity of the in-process backplane inbox.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            ttl_ms: None,
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl ClusterConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.heartbeat() * 2)
    }

    /// Converts to the core cluster settings.
    pub fn to_store_config(&self) -> StoreClusterConfig {
        StoreClusterConfig::with_heartbeat(self.heartbeat()).ttl(self.ttl())
    }
}

fn default_heartbeat_ms() -> u64 {
    30000
}

fn default_inbox_capacity() -> usize {
    1024
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Newline-delimited JSON. Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Append to [`LoggingConfig::file_path`].
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Trace carriers and bridge dispatch regardless of `level`.
    #[serde(default)]
    pub trace_forwarding: bool,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `edgewire_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            trace_forwarding: false,
            thread_ids: false,
            file_location: false,
            file_path: None,
            filters: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EdgeConfig::default();
        assert_eq!(config.server.forward_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.server.pool_max_idle, 1024);
        assert_eq!(config.cluster.heartbeat(), Duration::from_secs(30));
        assert_eq!(config.cluster.ttl(), Duration::from_secs(60));
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_explicit_ttl_wins() {
        let cluster = ClusterConfig {
            heartbeat_ms: 100,
            ttl_ms: Some(450),
            ..Default::default()
        };
        let store = cluster.to_store_config();
        assert_eq!(store.heartbeat, Duration::from_millis(100));
        assert_eq!(store.ttl, Duration::from_millis(450));
    }

    #[test]
    fn test_member_from_server_config() {
        let server = ServerConfig {
            id: Some("edge-1".into()),
            advertised_urls: vec!["http://10.0.0.1:8080".into()],
            ..Default::default()
        };
        let member = server.to_member();
        assert_eq!(member.server_id(), "edge-1");
        assert_eq!(member.advertised_urls(), ["http://10.0.0.1:8080".to_string()]);

        let generated = ServerConfig::default().resolve_id();
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EdgeConfig =
            serde_json::from_str(r#"{"server": {"id": "a"}, "logging": {"level": "debug"}}"#)
                .unwrap();
        assert_eq!(config.server.id.as_deref(), Some("a"));
        assert_eq!(config.server.forward_timeout_ms, 5000);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.cluster, ClusterConfig::default());
    }
}
