//! Environment and test presets

use super::{Config, DisplayConfig, Format};

/// Crates whose records the test preset shows at full detail.
const TEST_DIRECTIVE: &str = "warn,reclaim_resource=trace,reclaim_log=debug";

impl Config {
    /// Create configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = env_level() {
            config.level = level;
        }

        if let Ok(format) = std::env::var("RECLAIM_LOG_FORMAT") {
            config.format = Format::parse_lossy(&format);
        }

        if let Ok(service) = std::env::var("RECLAIM_SERVICE") {
            config.service = Some(service);
        }

        config.display.parse_env();
        config
    }

    /// Test configuration: workspace crates at trace, everything else at
    /// warn. Thread names are on so reaper records stand out from the test
    /// thread. `RECLAIM_LOG` or `RUST_LOG` replace the level.
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: env_level().unwrap_or_else(|| TEST_DIRECTIVE.to_string()),
            format: Format::Compact,
            display: DisplayConfig {
                colors: false,
                time: false,
                thread_names: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }
}

/// `RECLAIM_LOG`, falling back to `RUST_LOG`.
fn env_level() -> Option<String> {
    std::env::var("RECLAIM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
}
