//! JSONL and console logging for LifeLink nodes
//!
//! Every LifeLink crate logs through `tracing` with structured fields
//! (`message_id`, `channel`, `peer`, ...). This crate builds the subscriber
//! the node binary installs.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Pretty Console**: Human-readable output for development
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//! - **Node Context**: Tag every event with the node name and session
//!
//! # Quick Start
//!
//! ```ignore
//! use lifelink_logging::{LifelinkSubscriberBuilder, LogConfig, NodeContext};
//!
//! let _guard = LifelinkSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//!
//! let ctx = NodeContext::new("responder-7");
//! let _span = ctx.span().entered();
//! tracing::info!(message_id = "EMG_1", "Alert delivered");
//! ```

pub mod config;
pub mod context;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContext, fields};

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// A boxed layer over the base registry
pub type LogLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid filter directives: {0}")]
    Filter(String),

    #[error("Failed to open log file: {0}")]
    Appender(#[from] InitError),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the background file writer alive; drop it to flush
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LoggingGuard {
    file: Option<WorkerGuard>,
}

impl LoggingGuard {
    pub fn has_file_output(&self) -> bool {
        self.file.is_some()
    }
}

/// Builder for the LifeLink subscriber
///
/// By default, console output is JSONL. Use [`LogConfig::development`] for
/// pretty output. `RUST_LOG` overrides the configured levels unless
/// [`with_env_override(false)`](Self::with_env_override) is set.
pub struct LifelinkSubscriberBuilder {
    config: LogConfig,
    env_override: bool,
}

impl LifelinkSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
            env_override: true,
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Human-readable console output instead of JSONL
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.config.console.pretty = pretty;
        self.config.console.ansi = pretty;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Whether `RUST_LOG` takes precedence over the configured levels
    pub fn with_env_override(mut self, enabled: bool) -> Self {
        self.env_override = enabled;
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if self.env_override
            && let Ok(filter) = EnvFilter::try_from_default_env()
        {
            return Ok(filter);
        }
        EnvFilter::try_new(self.config.filter_directives())
            .map_err(|e| LoggingError::Filter(e.to_string()))
    }

    /// Build the subscriber without installing it
    pub fn build(self) -> Result<(impl Subscriber + Send + Sync, LoggingGuard), LoggingError> {
        let filter = self.env_filter()?;
        let mut layers: Vec<LogLayer> = Vec::new();
        let mut guard = LoggingGuard::default();

        if self.config.console.enabled {
            if self.config.console.pretty {
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(self.config.console.ansi)
                        .with_target(true)
                        .with_writer(std::io::stderr)
                        .boxed(),
                );
            } else {
                layers.push(jsonl_layer(&self.config.jsonl, std::io::stdout));
            }
        }

        if let Some(file) = &self.config.file {
            let (writer, worker) = file_writer(file)?;
            layers.push(jsonl_layer(&self.config.jsonl, writer));
            guard.file = Some(worker);
        }

        let subscriber = tracing_subscriber::registry().with(layers).with(filter);
        Ok((subscriber, guard))
    }

    /// Install the subscriber globally
    ///
    /// Keep the returned guard alive for the life of the program.
    pub fn init(self) -> Result<LoggingGuard, LoggingError> {
        let (subscriber, guard) = self.build()?;
        subscriber
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }
}

impl Default for LifelinkSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn jsonl_layer<W>(jsonl: &JsonlConfig, writer: W) -> LogLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_thread_ids(jsonl.include_thread_info)
        .with_thread_names(jsonl.include_thread_info)
        .with_writer(writer)
        .boxed()
}

fn file_writer(file: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match file.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file.prefix.as_str())
        .filename_suffix("log");
    if let Some(max) = file.max_files.filter(|&m| m > 0) {
        builder = builder.max_log_files(max);
    }
    let appender = builder.build(&file.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Pretty debug output for local runs; ignores an existing subscriber
pub fn init_development() -> LoggingGuard {
    LifelinkSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
        .unwrap_or_default()
}

/// Warnings only; safe to call from many tests
pub fn init_testing() {
    let _ = LifelinkSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LifelinkSubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
        assert!(!builder.config().console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = LifelinkSubscriberBuilder::new()
            .with_level("trace")
            .with_pretty(true)
            .with_console(false);
        assert_eq!(builder.config().default_level, "trace");
        assert!(builder.config().console.pretty);
        assert!(!builder.config().console.enabled);
    }

    #[test]
    fn test_invalid_level_rejected() {
        let result = LifelinkSubscriberBuilder::new()
            .with_env_override(false)
            .with_level("info,lifelink_relay=verbose")
            .build();
        assert!(matches!(result, Err(LoggingError::Filter(_))));
    }

    #[test]
    fn test_console_only_has_no_file_guard() {
        let (_subscriber, guard) = LifelinkSubscriberBuilder::new()
            .with_env_override(false)
            .build()
            .unwrap();
        assert!(!guard.has_file_output());
    }
}
