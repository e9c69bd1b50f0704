//! Subscriber setup for edgewire's `tracing` output.
//!
//! The bridges open one span per request: `dispatch` on the instance that
//! received it and `forwarded` (with `session` and `origin` fields) on the
//! peer that resumed it. [`SpanEvents::Requests`] therefore prints one line
//! when a request starts and one, with its busy and idle time, when it ends.
//!
//! ```rust,ignore
//! use edgewire_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .trace_forwarding(true)
//!     .span_events(SpanEvents::Requests)
//!     .init();
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

/// Directives enabled by [`LoggingBuilder::trace_forwarding`]: every carrier
/// sent or relayed, and every request entering a bridge.
pub const FORWARDING_DIRECTIVES: [&str; 3] = [
    "edgewire_core::forward=trace",
    "edgewire_core::bridge=debug",
    "edgewire_core::cluster=debug",
];

const DEFAULT_LOG_FILE: &str = "edgewire.log";

/// Span transitions worth logging for request spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpanEvents {
    #[default]
    Off,
    /// Creation and close of each request span.
    Requests,
    /// Every poll of a request span. Noisy for handlers that await often.
    Active,
    All,
}

impl From<SpanEvents> for FmtSpan {
    fn from(events: SpanEvents) -> Self {
        match events {
            SpanEvents::Off => FmtSpan::NONE,
            SpanEvents::Requests => FmtSpan::NEW | FmtSpan::CLOSE,
            SpanEvents::Active => FmtSpan::ACTIVE,
            SpanEvents::All => FmtSpan::FULL,
        }
    }
}

fn config_spans(config: &SpanEventConfig) -> FmtSpan {
    [
        (config.new, FmtSpan::NEW),
        (config.enter, FmtSpan::ENTER),
        (config.exit, FmtSpan::EXIT),
        (config.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(on, _)| *on)
    .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
}

/// Installs the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Builder for the global subscriber.
#[derive(Debug)]
pub struct LoggingBuilder {
    level: tracing::Level,
    directives: Vec<String>,
    trace_forwarding: bool,
    spans: FmtSpan,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    thread_ids: bool,
    file_location: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            level: tracing::Level::INFO,
            directives: Vec::new(),
            trace_forwarding: false,
            spans: FmtSpan::NONE,
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            thread_ids: false,
            file_location: false,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));

        Self {
            level: config.level.to_tracing_level(),
            directives: filters
                .into_iter()
                .map(|(module, level)| format!("{module}={level}"))
                .collect(),
            trace_forwarding: config.trace_forwarding,
            spans: config_spans(&config.span_events),
            format: config.format,
            output: config.output,
            file_path: config.file_path.clone(),
            thread_ids: config.thread_ids,
            file_location: config.file_location,
        }
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive such as `edgewire_core::routing=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Turns on [`FORWARDING_DIRECTIVES`]. Explicit directives still win.
    pub fn trace_forwarding(mut self, enabled: bool) -> Self {
        self.trace_forwarding = enabled;
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.spans = events.into();
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// File written when the output is [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Include source file and line number.
    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.file_location = enabled;
        self
    }

    /// Directives in the order they are applied; later ones override.
    fn effective_directives(&self) -> Vec<String> {
        let forwarding = FORWARDING_DIRECTIVES
            .iter()
            .filter(|_| self.trace_forwarding)
            .map(|d| d.to_string());
        forwarding.chain(self.directives.iter().cloned()).collect()
    }

    /// `RUST_LOG` if set, else the configured level; directives on top.
    fn build_filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string().to_lowercase()));
        self.effective_directives()
            .iter()
            .filter_map(|d| d.parse::<Directive>().ok())
            .fold(base, EnvFilter::add_directive)
    }

    /// The configured destination, or stdout and the reason it was not used.
    fn make_writer(&self) -> (BoxMakeWriter, Option<String>) {
        let path = match (self.output, &self.file_path) {
            (LogOutput::Stdout, _) => return (BoxMakeWriter::new(std::io::stdout), None),
            (LogOutput::Stderr, _) => return (BoxMakeWriter::new(std::io::stderr), None),
            (LogOutput::File, Some(path)) => path,
            (LogOutput::File, None) => {
                let reason = "file output requested without a file path".to_string();
                return (BoxMakeWriter::new(std::io::stdout), Some(reason));
            }
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE);
        match RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(dir)
        {
            Ok(appender) => (BoxMakeWriter::new(appender), None),
            Err(e) => (
                BoxMakeWriter::new(std::io::stdout),
                Some(format!("cannot open {}: {e}", path.display())),
            ),
        }
    }

    fn fmt_layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(self.spans.clone())
            .with_thread_ids(self.thread_ids)
            .with_file(self.file_location)
            .with_line_number(self.file_location);
        match self.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
        }
    }

    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber, failing if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let (writer, fallback) = self.make_writer();
        tracing_subscriber::registry()
            .with(self.fmt_layer(writer))
            .with(self.build_filter())
            .try_init()?;
        if let Some(reason) = fallback {
            tracing::warn!(%reason, "Logging to stdout instead of the configured file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_span_presets() {
        assert_eq!(FmtSpan::from(SpanEvents::Off), FmtSpan::NONE);
        assert_eq!(
            FmtSpan::from(SpanEvents::Requests),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        assert_eq!(FmtSpan::from(SpanEvents::All), FmtSpan::FULL);

        let config = SpanEventConfig {
            new: true,
            close: true,
            ..Default::default()
        };
        assert_eq!(config_spans(&config), SpanEvents::Requests.into());
        assert_eq!(config_spans(&SpanEventConfig::default()), FmtSpan::NONE);
    }

    #[test]
    fn test_config_filters_follow_forwarding_defaults() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            trace_forwarding: true,
            ..Default::default()
        };
        config
            .filters
            .insert("edgewire_core::forward".into(), LogLevel::Info);
        config.filters.insert("edgewire_core::bridge".into(), LogLevel::Error);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, tracing::Level::WARN);
        assert_eq!(
            builder.effective_directives(),
            vec![
                "edgewire_core::forward=trace",
                "edgewire_core::bridge=debug",
                "edgewire_core::cluster=debug",
                "edgewire_core::bridge=error",
                "edgewire_core::forward=info",
            ]
        );

        let quiet = LoggingBuilder::new().directive("edgewire_core=debug");
        assert_eq!(quiet.effective_directives(), vec!["edgewire_core=debug"]);
    }

    #[test]
    fn test_file_output_falls_back_to_stdout() {
        let (_, fallback) = LoggingBuilder::new().output(LogOutput::File).make_writer();
        assert!(fallback.unwrap().contains("without a file path"));

        let (_, fallback) = LoggingBuilder::new().output(LogOutput::Stderr).make_writer();
        assert!(fallback.is_none());
    }
}
