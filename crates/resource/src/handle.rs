//! Typed tokens for resources owned by a scope

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::scope::ScopeId;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an acquired resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an id from a raw value. Only meaningful for display and tests.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Liveness of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// Owned by the scope, release still pending.
    Open,
    /// Released (or taken out of the scope); the scope no longer owns it.
    Released,
}

/// Token naming one resource of type `T` inside one scope.
///
/// The handle carries no access to the resource itself; operations go
/// through [`Scope::with`](crate::Scope::with) so the scope can record
/// failures.
pub struct Handle<T> {
    id: HandleId,
    scope: ScopeId,
    _resource: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(id: HandleId, scope: ScopeId) -> Self {
        Self {
            id,
            scope,
            _resource: PhantomData,
        }
    }

    /// Identity of the handle.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Scope that owns the resource.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }
}

// Manual impls: derives would require `T: Clone` and friends.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = HandleId::next();
        let b = HandleId::next();
        assert!(b > a);
    }

    #[test]
    fn handle_is_copy_regardless_of_resource_type() {
        struct NotClone;
        let h: Handle<NotClone> = Handle::new(HandleId::from_raw(5), ScopeId::from_raw(9));
        let copy = h;
        assert_eq!(h, copy);
        assert_eq!(copy.id().as_u64(), 5);
        assert_eq!(copy.scope(), ScopeId::from_raw(9));
    }
}
