//! Testing utilities for scopes, release actions and listeners

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::release::ReleaseAction;

/// Simple error with a fixed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError {
    message: String,
}

impl TestError {
    /// Error displaying exactly `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TestError {}

/// Records the order in which release actions ran.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ReleaseLog {
    /// Empty log; clones share the same entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Action that records `name` and succeeds.
    pub fn action<T: Send + 'static>(&self, name: &str) -> ReleaseAction<T> {
        let entries = Arc::clone(&self.entries);
        let name = name.to_string();
        ReleaseAction::infallible(move |_| entries.lock().push(name))
    }

    /// Action that records `name` and then fails with `message`.
    pub fn failing_action<T: Send + 'static>(&self, name: &str, message: &str) -> ReleaseAction<T> {
        let entries = Arc::clone(&self.entries);
        let name = name.to_string();
        let message = message.to_string();
        ReleaseAction::new(move |_| {
            entries.lock().push(name);
            Err(TestError::new(message))
        })
    }

    /// Record an arbitrary entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Entries recorded so far, in order.
    pub fn order(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}
