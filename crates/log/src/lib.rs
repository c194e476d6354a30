//! # Reclaim Log
//!
//! Logging bootstrap for the reclaim workspace, built on `tracing` and
//! `tracing-subscriber`.
//!
//! ```no_run
//! let _guard = reclaim_log::init().expect("logger");
//! reclaim_log::info!("ready");
//! ```

mod builder;
mod config;
mod error;
mod macros;

use std::sync::Once;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format};
pub use error::{LogError, LogResult};

pub use tracing;
pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};

/// Install a logger configured from the environment.
pub fn init() -> LogResult<LoggerGuard> {
    init_with(Config::from_env())
}

/// Install a logger from `config`.
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Install a test logger once per process; later calls do nothing.
///
/// Output goes through libtest capture. `RECLAIM_LOG` or `RUST_LOG`
/// overrides the level.
pub fn init_test() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Another harness may have installed a subscriber first.
        let _ = LoggerBuilder::from_config(Config::test())
            .with_test_writer()
            .build();
    });
}
