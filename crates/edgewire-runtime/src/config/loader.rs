//! Figment-backed configuration loading.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults
//! 2. `edgewire.<profile>.<ext>` next to the main file
//! 3. the main file, `edgewire.<ext>` or `config.<ext>`, from the first
//!    search path that has one
//! 4. `EDGEWIRE_*` environment variables, `__` separating sections
//!    (`EDGEWIRE_CLUSTER__HEARTBEAT_MS=5000` sets `cluster.heartbeat_ms`)
//! 5. values passed to [`ConfigLoader::set`] and [`ConfigLoader::merge`]
//!
//! Extensions are `toml` with the `toml-config` feature and `yaml`/`yml`
//! with `yaml-config`. Without either feature only 1, 4 and 5 apply.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .set("server.id", "edge-eu-1")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use figment::Figment;
use figment::providers::{Env, Serialized};
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::EdgeConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "EDGEWIRE_";
const PROFILE_VAR: &str = "EDGEWIRE_PROFILE";
const APP_DIR: &str = "edgewire";
const BASE_NAMES: [&str; 2] = ["edgewire", "config"];

/// Deployment profile, selecting the `edgewire.<profile>.<ext>` overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `EDGEWIRE_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for Profile {
    type Err = std::convert::Infallible;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name.trim().to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" | "" => Self::Development,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A config file format compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl ConfigFormat {
    const ENABLED: &'static [ConfigFormat] = &[
        #[cfg(feature = "toml-config")]
        ConfigFormat::Toml,
        #[cfg(feature = "yaml-config")]
        ConfigFormat::Yaml,
    ];

    fn extensions(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &["toml"],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &["yaml", "yml"],
        }
    }

    fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ENABLED
            .iter()
            .copied()
            .find(|format| format.extensions().contains(&ext))
    }

    fn merge_into(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(figment::providers::Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(figment::providers::Yaml::file(path)),
        }
    }
}

/// Builder that assembles and validates an [`EdgeConfig`].
pub struct ConfigLoader {
    profile: Profile,
    search_paths: Vec<PathBuf>,
    file: Option<PathBuf>,
    env: bool,
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            file: None,
            env: true,
            overrides: Figment::new(),
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = profile.as_ref().parse().unwrap_or_default();
        self
    }

    /// Adds a directory to search. The defaults (working directory, then
    /// `<user config dir>/edgewire`) apply only while none is added.
    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join(APP_DIR)),
            None => self,
        }
    }

    /// Uses exactly this main file instead of searching. Its profile overlay
    /// is still picked up from the same directory.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Overrides every setting with `config`.
    pub fn merge(mut self, config: EdgeConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Overrides one setting by dotted key, e.g. `("server.id", "edge-1")`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Files that [`ConfigLoader::load`] merges, lowest priority first.
    pub fn discover(&self) -> ConfigResult<Vec<PathBuf>> {
        let main = match &self.file {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path.clone())),
            Some(path) if ConfigFormat::of(path).is_none() => {
                return Err(ConfigError::UnsupportedFormat(path.clone()));
            }
            Some(path) => Some(path.clone()),
            None => self.find_main_file(),
        };
        let Some(main) = main else {
            return Ok(Vec::new());
        };

        let mut files = Vec::with_capacity(2);
        if let Some(overlay) = self.profile_overlay(&main) {
            files.push(overlay);
        }
        files.push(main);
        Ok(files)
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(APP_DIR)))
            .collect()
    }

    fn find_main_file(&self) -> Option<PathBuf> {
        self.search_dirs().into_iter().find_map(|dir| {
            BASE_NAMES.iter().find_map(|base| {
                ConfigFormat::ENABLED
                    .iter()
                    .flat_map(|format| format.extensions())
                    .map(|ext| dir.join(format!("{base}.{ext}")))
                    .find(|path| path.is_file())
            })
        })
    }

    /// `edgewire.production.toml` for `edgewire.toml`, if present.
    fn profile_overlay(&self, main: &Path) -> Option<PathBuf> {
        let stem = main.file_stem()?.to_str()?;
        let ext = main.extension()?.to_str()?;
        let overlay = main.with_file_name(format!("{stem}.{}.{ext}", self.profile));
        overlay.is_file().then_some(overlay)
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<EdgeConfig> {
        let files = self.discover()?;
        if files.is_empty() {
            debug!(profile = %self.profile, "No configuration file found, using defaults");
        }

        let mut figment = Figment::from(Serialized::defaults(EdgeConfig::default()));
        for path in &files {
            if let Some(format) = ConfigFormat::of(path) {
                info!(path = %path.display(), "Loading configuration file");
                figment = format.merge_into(figment, path);
            }
        }
        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }
        let config: EdgeConfig = figment.merge(self.overrides).extract()?;
        validate_config(&config)?;

        debug!(
            profile = %self.profile,
            server_id = config.server.id.as_deref().unwrap_or("<generated>"),
            heartbeat_ms = config.cluster.heartbeat_ms,
            forward_timeout_ms = config.server.forward_timeout_ms,
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<EdgeConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with environment overrides.
pub fn load_config_from_file(path: impl Into<PathBuf>) -> ConfigResult<EdgeConfig> {
    ConfigLoader::new().file(path).load()
}
