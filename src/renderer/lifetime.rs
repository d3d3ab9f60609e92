use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

struct LifetimeShared<T> {
    object: Mutex<Weak<T>>,
    active: AtomicUsize,
}

/// Weak, thread-safe reference to an object owned elsewhere.
///
/// The owner creates the handle and calls [`Lifetime::destroy`] exactly once
/// before tearing the object down. Every other holder keeps an
/// [`add_ref`](Lifetime::add_ref) copy and reaches the object through
/// [`acquire`](Lifetime::acquire), which returns `None` once the owner is
/// gone. `None` is an expected outcome, not an error.
///
/// Dropping a copy is the `free_ref`; the shared handle outlives the object
/// for as long as any copy exists.
pub struct Lifetime<T> {
    shared: Arc<LifetimeShared<T>>,
}

impl<T> Lifetime<T> {
    /// Binds a handle to an owner. Meant for `Arc::new_cyclic`.
    pub fn new(owner: Weak<T>) -> Self {
        Self {
            shared: Arc::new(LifetimeShared {
                object: Mutex::new(owner),
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn from_arc(owner: &Arc<T>) -> Self {
        Self::new(Arc::downgrade(owner))
    }

    /// Takes another long-lived reference to the same handle.
    pub fn add_ref(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the object if it is still alive. The guard is the `release`.
    pub fn acquire(&self) -> Option<LifetimeGuard<T>> {
        let object = self.shared.object.lock();
        let strong = object.upgrade()?;
        self.shared.active.fetch_add(1, Ordering::AcqRel);
        drop(object);

        Some(LifetimeGuard {
            object: strong,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Expires the handle and waits for outstanding acquires to release.
    ///
    /// Must not be called while the calling thread holds a guard from this
    /// handle.
    pub fn destroy(&self) {
        *self.shared.object.lock() = Weak::new();

        let mut spins = 0u32;
        while self.shared.active.load(Ordering::Acquire) > 0 {
            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }

    pub fn is_expired(&self) -> bool {
        self.shared.object.lock().strong_count() == 0
    }

    /// Number of handle copies, the owner's included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Whether both handles refer to the same owner.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Stable identity of the handle. It cannot be reused while this copy
    /// is alive.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.shared) as *const () as usize
    }
}

impl<T> Clone for Lifetime<T> {
    fn clone(&self) -> Self {
        self.add_ref()
    }
}

impl<T> fmt::Debug for Lifetime<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("expired", &self.is_expired())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Transient access obtained from [`Lifetime::acquire`].
pub struct LifetimeGuard<T> {
    object: Arc<T>,
    shared: Arc<LifetimeShared<T>>,
}

impl<T> LifetimeGuard<T> {
    pub fn object(&self) -> &Arc<T> {
        &self.object
    }
}

impl<T> Deref for LifetimeGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T> Drop for LifetimeGuard<T> {
    fn drop(&mut self) {
        // Runs before `object` is dropped, so an owner torn down by this
        // guard never waits on itself.
        self.shared.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    struct Owner {
        lifetime: Lifetime<Owner>,
        value: u32,
    }

    fn owner(value: u32) -> Arc<Owner> {
        Arc::new_cyclic(|weak| Owner {
            lifetime: Lifetime::new(weak.clone()),
            value,
        })
    }

    #[test]
    fn acquire_after_destroy_returns_none() {
        let owner = owner(7);
        let holder = owner.lifetime.add_ref();
        assert_eq!(holder.acquire().map(|o| o.value), Some(7));

        owner.lifetime.destroy();
        assert!(holder.acquire().is_none());
        assert!(holder.is_expired());
        assert!(Arc::strong_count(&owner) == 1);
    }

    #[test]
    fn handle_outlives_owner() {
        let owner = owner(1);
        let holder = owner.lifetime.add_ref();
        assert_eq!(holder.ref_count(), 2);
        drop(owner);
        assert!(holder.acquire().is_none());
        assert_eq!(holder.ref_count(), 1);
    }

    #[test]
    fn identity_is_shared_between_copies() {
        let a = owner(1);
        let b = owner(2);
        let copy = a.lifetime.add_ref();
        assert!(copy.ptr_eq(&a.lifetime));
        assert_eq!(copy.id(), a.lifetime.id());
        assert!(!copy.ptr_eq(&b.lifetime));
    }

    #[test]
    fn destroy_waits_for_outstanding_acquires() {
        let owner = owner(3);
        let holder = owner.lifetime.add_ref();
        let guard = holder.acquire().unwrap();
        let released = Arc::new(AtomicBool::new(false));

        let releaser = {
            let released = Arc::clone(&released);
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(20));
                released.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };

        owner.lifetime.destroy();
        assert!(released.load(Ordering::SeqCst));
        releaser.join().unwrap();
    }
}
