//! Logger configuration

mod presets;

use serde::{Deserialize, Serialize};

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive, e.g. `info` or `reclaim_resource=debug,warn`
    pub level: String,
    /// Output format
    pub format: Format,
    /// What each record shows
    pub display: DisplayConfig,
    /// Service name recorded on a root span, if any
    pub service: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            display: DisplayConfig::default(),
            service: None,
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human oriented
    Pretty,
    /// One line per record
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl Format {
    /// Parse a format name, falling back to [`Format::Compact`].
    #[must_use]
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Display options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DisplayConfig {
    /// ANSI colors
    pub colors: bool,
    /// Timestamps
    pub time: bool,
    /// Event target (module path)
    pub target: bool,
    /// File and line
    pub source: bool,
    /// Thread names; useful to tell the reaper thread apart
    pub thread_names: bool,
    /// Flatten event fields into the JSON root
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            time: true,
            target: true,
            source: false,
            thread_names: false,
            flatten: false,
        }
    }
}

impl DisplayConfig {
    /// Apply `RECLAIM_LOG_*` display overrides.
    pub(crate) fn parse_env(&mut self) {
        fn flag(name: &str) -> Option<bool> {
            std::env::var(name)
                .ok()
                .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
        }

        if let Some(colors) = flag("RECLAIM_LOG_COLORS") {
            self.colors = colors;
        }
        if std::env::var_os("NO_COLOR").is_some() {
            self.colors = false;
        }
        if let Some(time) = flag("RECLAIM_LOG_TIME") {
            self.time = time;
        }
        if let Some(source) = flag("RECLAIM_LOG_SOURCE") {
            self.source = source;
        }
        if let Some(thread_names) = flag("RECLAIM_LOG_THREADS") {
            self.thread_names = thread_names;
        }
    }
}
