//! Reference-counted ownership of heavyweight resources.
//!
//! A [`SharedResource`] is torn down exactly once, when the last
//! [`ResourceRef`] pointing at it is released. Handles release on drop, so
//! every exit path gives its reference back; [`ResourceRef::release`] does the
//! same explicitly and reports whether it was the release that destroyed the
//! resource.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A resource with an explicit teardown step.
pub trait Destroyable: Send + Sync {
    /// Tears the resource down.
    ///
    /// Returns `true` if this call performed the teardown, `false` if the
    /// resource had already been destroyed.
    fn destroy(&self) -> bool;
}

/// Shared state behind every [`ResourceRef`] to one resource.
pub struct SharedResource<R: Destroyable> {
    resource: R,
    refs: AtomicUsize,
    destroyed: AtomicBool,
}

impl<R: Destroyable> SharedResource<R> {
    /// Takes ownership of `resource`, returning the owner's reference.
    pub fn open(resource: R) -> ResourceRef<R> {
        ResourceRef {
            shared: Arc::new(Self {
                resource,
                refs: AtomicUsize::new(1),
                destroyed: AtomicBool::new(false),
            }),
            released: false,
        }
    }

    /// Number of unreleased references.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Whether the last reference has been released.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// One counted reference to a [`SharedResource`].
///
/// Cloning is the same as [`refer`](Self::refer). Dropping is the same as
/// [`release`](Self::release).
pub struct ResourceRef<R: Destroyable> {
    shared: Arc<SharedResource<R>>,
    released: bool,
}

impl<R: Destroyable> ResourceRef<R> {
    /// Takes an additional reference.
    #[must_use]
    pub fn refer(&self) -> Self {
        self.shared.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
            released: false,
        }
    }

    /// Gives this reference back.
    ///
    /// Returns `true` if this was the last reference and the resource was
    /// destroyed as a result.
    pub fn release(mut self) -> bool {
        self.release_once()
    }

    /// The shared state, for inspecting counts.
    #[must_use]
    pub fn shared(&self) -> &SharedResource<R> {
        &self.shared
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.shared.ref_count()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    fn release_once(&mut self) -> bool {
        if std::mem::replace(&mut self.released, true) {
            return false;
        }
        if self.shared.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return false;
        }
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let performed = self.shared.resource.destroy();
        tracing::debug!(performed, "last reference released; resource destroyed");
        true
    }
}

impl<R: Destroyable> Clone for ResourceRef<R> {
    fn clone(&self) -> Self {
        self.refer()
    }
}

impl<R: Destroyable> Deref for ResourceRef<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.shared.resource
    }
}

impl<R: Destroyable> Drop for ResourceRef<R> {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl<R: Destroyable> fmt::Debug for ResourceRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("ref_count", &self.ref_count())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
