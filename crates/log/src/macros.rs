//! Convenience macros for structured logging

/// Log an error and return it
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        $crate::error!(error = %e);
        e
    }};
    ($err:expr, $($arg:tt)*) => {{
        let e = $err;
        $crate::error!(error = %e, $($arg)*);
        e
    }};
}

/// Create a span with an `elapsed_ms` field to fill in on completion
#[macro_export]
macro_rules! timed_span {
    ($name:expr) => {
        $crate::tracing::info_span!($name, elapsed_ms = $crate::tracing::field::Empty)
    };
    ($level:expr, $name:expr) => {
        $crate::tracing::span!($level, $name, elapsed_ms = $crate::tracing::field::Empty)
    };
    ($level:expr, $name:expr, $($field:tt)*) => {
        $crate::tracing::span!($level, $name, elapsed_ms = $crate::tracing::field::Empty, $($field)*)
    };
}
