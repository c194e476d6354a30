//! Release actions supplied by whoever acquires a resource

use std::fmt;

use crate::error::BoxError;

type ReleaseFn<T> = Box<dyn FnOnce(T) -> Result<(), BoxError> + Send>;

/// The capability to release one resource.
///
/// The action is consumed the first time it runs, so running it again is a
/// no-op that reports success. A scope relies on this to never double-free.
pub struct ReleaseAction<T> {
    action: Option<ReleaseFn<T>>,
}

impl<T> ReleaseAction<T> {
    /// Create an action from a fallible closure.
    pub fn new<F, E>(f: F) -> Self
    where
        F: FnOnce(T) -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            action: Some(Box::new(move |resource| f(resource).map_err(Into::into))),
        }
    }

    /// Create an action that cannot fail.
    pub fn infallible<F>(f: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            action: Some(Box::new(move |resource| {
                f(resource);
                Ok(())
            })),
        }
    }

    /// An action that simply drops the resource.
    #[must_use]
    pub fn noop() -> Self {
        Self { action: None }
    }

    /// Whether the action has already run (or never had anything to run).
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.action.is_none()
    }

    /// Run the action on `resource`.
    ///
    /// A spent action just drops `resource` and returns `Ok(())`.
    pub fn run(&mut self, resource: T) -> Result<(), BoxError> {
        match self.action.take() {
            Some(action) => action(resource),
            None => Ok(()),
        }
    }
}

impl<T: Releasable> ReleaseAction<T> {
    /// Release through the resource's own [`Releasable`] implementation.
    #[must_use]
    pub fn releasable() -> Self {
        Self::new(|mut resource: T| resource.release())
    }
}

impl<T> Default for ReleaseAction<T> {
    fn default() -> Self {
        Self::noop()
    }
}

impl<T> fmt::Debug for ReleaseAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseAction")
            .field("spent", &self.is_spent())
            .finish()
    }
}

/// A resource type that knows how to release itself.
///
/// Implementations must be idempotent: a second `release` must neither fail
/// nor repeat side effects. Tracking an `open` flag is enough.
pub trait Releasable: Send + 'static {
    /// Release the underlying resource.
    fn release(&mut self) -> Result<(), BoxError>;
}
