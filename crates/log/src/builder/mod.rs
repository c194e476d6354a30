//! Logger builder implementation

#[macro_use]
mod format;

use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Format};
use crate::error::{LogError, LogResult};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
    test_writer: bool,
}

/// Guard that keeps the logger's root span entered
///
/// Dropping the guard exits the root span; the global subscriber itself
/// stays installed for the rest of the process.
#[derive(Debug)]
pub struct LoggerGuard {
    format: Format,
    /// RAII guard for the root span
    _root_span: Option<tracing::span::EnteredSpan>,
}

impl LoggerGuard {
    /// Format the installed logger writes.
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            test_writer: false,
        }
    }

    /// Write through libtest's capture instead of stdout.
    #[must_use]
    pub fn with_test_writer(mut self) -> Self {
        self.test_writer = true;
        self
    }

    /// Build and install the logger as the global default
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - A global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = EnvFilter::try_new(&self.config.level)
            .map_err(|e| LogError::Filter(format!("{}: {}", &self.config.level, e)))?;

        let writer = if self.test_writer {
            BoxMakeWriter::new(TestWriter::new())
        } else {
            BoxMakeWriter::new(std::io::stdout)
        };

        let display = &self.config.display;
        let fmt_layer: BoxedLayer = match self.config.format {
            Format::Pretty => create_fmt_layer!(pretty, display, writer),
            Format::Compact => create_fmt_layer!(compact, display, writer),
            Format::Json => create_json_layer!(display, writer),
        };

        Registry::default()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        let root_span = self
            .config
            .service
            .as_deref()
            .map(|service| tracing::info_span!("app", service).entered());

        tracing::debug!(
            level = %self.config.level,
            format = ?self.config.format,
            "Logger initialized"
        );

        Ok(LoggerGuard {
            format: self.config.format,
            _root_span: root_span,
        })
    }
}
