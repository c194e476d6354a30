//! Error types for scoped resource management
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::handle::HandleId;
use crate::scope::ScopeId;

/// Result type for resource operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error accepted from callers' operations and release actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared, cloneable error cause.
///
/// A use-time failure is both returned to the caller and remembered by the
/// scope for teardown, so the cause has to be shareable.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Comprehensive error type for scope, release and registry operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Acquire was attempted on a scope that has already been torn down
    #[error("Scope {scope} is closed")]
    ScopeClosed {
        /// The closed scope
        scope: ScopeId,
    },

    /// Handle does not name an open resource of this scope
    #[error("Handle {handle} is not open in scope {scope}")]
    StaleHandle {
        /// The offending handle
        handle: HandleId,
        /// The scope it was presented to
        scope: ScopeId,
    },

    /// An operation on a resource failed
    #[error("{0}")]
    Use(Failure),

    /// An explicit early release failed
    #[error("{0}")]
    Release(Failure),

    /// Scope exit observed at least one failure
    #[error(transparent)]
    Teardown(TeardownFailure),

    /// Configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The failure record carried by this error, if any.
    ///
    /// For a teardown this is the primary failure.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Use(failure) | Self::Release(failure) => Some(failure),
            Self::Teardown(teardown) => Some(teardown.primary()),
            Self::ScopeClosed { .. } | Self::StaleHandle { .. } | Self::Configuration { .. } => {
                None
            }
        }
    }

    /// The composite teardown failure, if this is one.
    #[must_use]
    pub fn as_teardown(&self) -> Option<&TeardownFailure> {
        match self {
            Self::Teardown(teardown) => Some(teardown),
            _ => None,
        }
    }

    /// Whether this error is the usage mistake of touching a closed scope or
    /// a dead handle, as opposed to a resource failure.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::ScopeClosed { .. } | Self::StaleHandle { .. })
    }
}

/// Turn a panic payload caught with `catch_unwind` into an error.
pub(crate) fn panic_cause(payload: Box<dyn std::any::Any + Send>) -> BoxError {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };
    format!("panicked: {message}").into()
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Where in a scope's life a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Raised by an operation passed to [`Scope::with`](crate::Scope::with).
    Use,
    /// Raised by a release action.
    Release,
    /// Raised by the body of [`ScopeManager::scoped`](crate::ScopeManager::scoped)
    /// outside of any resource operation.
    Body,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Use => write!(f, "use"),
            Self::Release => write!(f, "release"),
            Self::Body => write!(f, "body"),
        }
    }
}

/// One recorded failure: its stage, the handle involved and the cause.
#[derive(Debug, Clone)]
pub struct Failure {
    stage: Stage,
    handle: Option<HandleId>,
    label: Arc<str>,
    cause: Cause,
}

impl Failure {
    pub(crate) fn new(stage: Stage, handle: Option<HandleId>, label: Arc<str>, cause: Cause) -> Self {
        Self {
            stage,
            handle,
            label,
            cause,
        }
    }

    pub(crate) fn from_box(
        stage: Stage,
        handle: Option<HandleId>,
        label: Arc<str>,
        error: BoxError,
    ) -> Self {
        Self::new(stage, handle, label, Arc::from(error))
    }

    /// Stage at which the failure was raised.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Handle the failure relates to (none for body failures).
    #[must_use]
    pub fn handle(&self) -> Option<HandleId> {
        self.handle
    }

    /// Label of the resource (or `"scope"` for body failures).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The underlying cause.
    #[must_use]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handle {
            Some(handle) => write!(
                f,
                "{} of '{}' ({}) failed: {}",
                self.stage, self.label, handle, self.cause
            ),
            None => write!(f, "{} of '{}' failed: {}", self.stage, self.label, self.cause),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

// ---------------------------------------------------------------------------
// TeardownFailure
// ---------------------------------------------------------------------------

/// Composite failure surfaced when a scope exits.
///
/// Carries exactly one primary failure plus the suppressed ones in the order
/// their handles were released. Nothing recorded during the scope's life is
/// dropped.
#[derive(Debug, Clone)]
pub struct TeardownFailure {
    scope: ScopeId,
    primary: Failure,
    suppressed: Vec<Failure>,
}

impl TeardownFailure {
    pub(crate) fn new(scope: ScopeId, primary: Failure, suppressed: Vec<Failure>) -> Self {
        Self {
            scope,
            primary,
            suppressed,
        }
    }

    /// The scope that produced this failure.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The prioritized failure.
    #[must_use]
    pub fn primary(&self) -> &Failure {
        &self.primary
    }

    /// Subordinate failures, in release order.
    #[must_use]
    pub fn suppressed(&self) -> &[Failure] {
        &self.suppressed
    }

    /// Every failure, primary first.
    pub fn causes(&self) -> impl Iterator<Item = &Failure> {
        std::iter::once(&self.primary).chain(self.suppressed.iter())
    }

    /// Consume into the primary and suppressed parts.
    #[must_use]
    pub fn into_parts(self) -> (Failure, Vec<Failure>) {
        (self.primary, self.suppressed)
    }
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown of scope {} failed: {}", self.scope, self.primary)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestError;

    fn failure(stage: Stage, message: &str) -> Failure {
        Failure::new(
            stage,
            Some(HandleId::from_raw(7)),
            Arc::from("db"),
            Arc::new(TestError::new(message)),
        )
    }

    #[test]
    fn failure_display_names_stage_and_label() {
        let f = failure(Stage::Release, "close error");
        assert_eq!(f.to_string(), "release of 'db' (handle-7) failed: close error");
    }

    #[test]
    fn teardown_causes_start_with_primary() {
        let t = TeardownFailure::new(
            ScopeId::from_raw(1),
            failure(Stage::Use, "disk error"),
            vec![failure(Stage::Release, "a"), failure(Stage::Release, "b")],
        );
        let messages: Vec<String> = t.causes().map(|f| f.cause().to_string()).collect();
        assert_eq!(messages, vec!["disk error", "a", "b"]);
        assert!(t.to_string().contains("(2 suppressed)"));
    }

    #[test]
    fn misuse_classification() {
        let closed = Error::ScopeClosed {
            scope: ScopeId::from_raw(3),
        };
        assert!(closed.is_misuse());
        assert!(closed.failure().is_none());
        assert!(!Error::configuration("bad").is_misuse());
    }

    #[test]
    fn teardown_error_exposes_primary_failure() {
        let err = Error::Teardown(TeardownFailure::new(
            ScopeId::from_raw(2),
            failure(Stage::Use, "disk error"),
            Vec::new(),
        ));
        assert_eq!(err.failure().map(Failure::stage), Some(Stage::Use));
        assert!(err.as_teardown().is_some());
    }
}
