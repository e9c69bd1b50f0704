//! Configuration errors, keyed by the dotted path of the offending setting.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file extension maps to no enabled format feature.
    #[error("no enabled format reads '{}'", .0.display())]
    UnsupportedFormat(PathBuf),

    /// A source could not be read or a value has the wrong type.
    #[error("bad value for '{key}': {message}")]
    Source { key: String, message: String },

    /// A value was read but breaks a constraint.
    #[error("invalid '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    /// A setting that another setting depends on is absent.
    #[error("'{key}' is required when {because}")]
    Missing {
        key: &'static str,
        because: &'static str,
    },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }

    /// Dotted path of the setting at fault, e.g. `cluster.ttl_ms`.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Source { key, .. } => Some(key),
            Self::Invalid { key, .. } | Self::Missing { key, .. } => Some(key),
            Self::FileNotFound(_) | Self::UnsupportedFormat(_) => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        let key = if err.path.is_empty() {
            "<root>".to_string()
        } else {
            err.path.join(".")
        };
        Self::Source {
            key,
            message: err.kind.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use figment::providers::Serialized;

    #[test]
    fn test_figment_error_keeps_key() {
        #[derive(Debug, serde::Deserialize)]
        struct Cluster {
            #[allow(dead_code)]
            heartbeat_ms: u64,
        }
        #[derive(Debug, serde::Deserialize)]
        struct Root {
            #[allow(dead_code)]
            cluster: Cluster,
        }

        let err = Figment::from(Serialized::default("cluster.heartbeat_ms", "soon"))
            .extract::<Root>()
            .unwrap_err();
        let err = ConfigError::from(err);
        assert!(err.key().is_some_and(|key| key.ends_with("cluster.heartbeat_ms")));
        assert!(err.to_string().starts_with("bad value for"));
    }

    #[test]
    fn test_messages_name_the_setting() {
        let err = ConfigError::invalid("server.forward_timeout_ms", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "invalid 'server.forward_timeout_ms': must be greater than 0"
        );
        assert!(ConfigError::FileNotFound("edge.toml".into()).key().is_none());
    }
}
