//! Cross-field checks that serde defaults cannot express.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ClusterConfig, EdgeConfig, LogOutput, LoggingConfig, ServerConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &EdgeConfig) -> ConfigResult<()> {
    validate_server(&config.server)?;
    validate_cluster(&config.cluster)?;
    validate_logging(&config.logging)
}

fn validate_server(server: &ServerConfig) -> ConfigResult<()> {
    if server.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(ConfigError::invalid("server.id", "must not be blank when set"));
    }
    if server.forward_timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "server.forward_timeout_ms",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_cluster(cluster: &ClusterConfig) -> ConfigResult<()> {
    if cluster.heartbeat_ms == 0 {
        return Err(ConfigError::invalid(
            "cluster.heartbeat_ms",
            "must be greater than 0",
        ));
    }
    // a member must survive at least one missed refresh
    if cluster.ttl() <= cluster.heartbeat() {
        return Err(ConfigError::invalid(
            "cluster.ttl_ms",
            format!(
                "{}ms does not outlive the {}ms heartbeat",
                cluster.ttl().as_millis(),
                cluster.heartbeat_ms
            ),
        ));
    }
    if cluster.inbox_capacity == 0 {
        return Err(ConfigError::invalid(
            "cluster.inbox_capacity",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::Missing {
            key: "logging.file_path",
            because: "logging.output is \"file\"",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected_key(config: &EdgeConfig) -> Option<String> {
        validate_config(config)
            .err()
            .and_then(|e| e.key().map(str::to_string))
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&EdgeConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_heartbeat() {
        let mut config = EdgeConfig::default();
        config.cluster.heartbeat_ms = 0;
        assert_eq!(rejected_key(&config).as_deref(), Some("cluster.heartbeat_ms"));
    }

    #[test]
    fn test_rejects_ttl_not_above_heartbeat() {
        let mut config = EdgeConfig::default();
        config.cluster.heartbeat_ms = 1000;
        config.cluster.ttl_ms = Some(1000);
        assert_eq!(rejected_key(&config).as_deref(), Some("cluster.ttl_ms"));

        config.cluster.ttl_ms = Some(1001);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_forward_timeout() {
        let mut config = EdgeConfig::default();
        config.server.forward_timeout_ms = 0;
        assert_eq!(
            rejected_key(&config).as_deref(),
            Some("server.forward_timeout_ms")
        );
    }

    #[test]
    fn test_rejects_zero_inbox_capacity() {
        let mut config = EdgeConfig::default();
        config.cluster.inbox_capacity = 0;
        assert_eq!(rejected_key(&config).as_deref(), Some("cluster.inbox_capacity"));
    }

    #[test]
    fn test_rejects_blank_server_id() {
        let mut config = EdgeConfig::default();
        config.server.id = Some("  ".into());
        assert_eq!(rejected_key(&config).as_deref(), Some("server.id"));

        config.server.id = None;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = EdgeConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Missing { key: "logging.file_path", .. })
        ));
    }
}
