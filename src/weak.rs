//! Weak references and the destruction protocol that makes them safe.
//!
//! A region's weak cell is lazily populated with a *stub*: a small region
//! of its own (`WeakStub`) that holds a bare, non-owning pointer back to
//! the original region's header. `Weak<T>` handles hold a use-count on the
//! stub, never on the original region directly — this is what lets the
//! original region reach a refcount of zero and be destroyed while weak
//! references to it are still outstanding. `upgrade` turns a stub pointer
//! back into a real handle only if the original region's destroy-lock bit
//! says it's still alive.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire};

use crate::config::HOHDEL;
use crate::region::{self, Region, RegionHeader};
use crate::tagged::{self, TaggedPtr};

/// The stub a weak cell points at. Lives in its own region, store-counted
/// once by the original region's `weak` cell and use-counted once per live
/// [`Weak<T>`] handle.
pub(crate) struct WeakStub {
    /// Non-owning pointer to the original region's header, tagged with
    /// [`crate::config::HOHDEL`] once that region has been destroyed.
    pub(crate) target: TaggedPtr<RegionHeader>,
}

/// A weak reference to a region of type `T`.
pub struct Weak<T> {
    stub: Region<WeakStub>,
    _marker: PhantomData<*const T>,
}

unsafe impl<T: Send + Sync> Send for Weak<T> {}
unsafe impl<T: Send + Sync> Sync for Weak<T> {}

/// Backs [`Region::downgrade`]: lazily publishes a stub into `region`'s
/// weak cell the first time anyone downgrades it, then hands back a
/// freshly use-counted handle to that stub. Returns `None` only when this
/// is the first downgrade of `region` and allocating its stub fails —
/// the one allocation-failure path inside the ARCP core (spec.md §4.1).
pub(crate) fn downgrade<T>(region: &Region<T>) -> Option<Weak<T>> {
    let header = region.header_ptr();
    let weak_cell = unsafe { &header.as_ref().weak };
    if weak_cell.peek_ptr().is_none() {
        let candidate = Region::try_new(WeakStub {
            target: TaggedPtr::new(header.as_ptr()),
        })?;
        // Races against any other concurrent first-downgrade of this same
        // region; exactly one candidate wins and the loser's handle is
        // simply dropped.
        weak_cell.try_publish_once(candidate);
    }
    let stub_ptr = weak_cell
        .peek_ptr()
        .expect("weak cell is never cleared once published");
    region::acquire_use(region::header_of(stub_ptr));
    Some(Weak {
        stub: unsafe { Region::from_raw(stub_ptr) },
        _marker: PhantomData,
    })
}

impl<T> Weak<T> {
    /// Attempts to recover a strong handle (`upgrade`).
    /// Returns `None` if the original region has already been destroyed.
    pub fn upgrade(&self) -> Option<Region<T>> {
        let bits = self.stub.target.load(Acquire);
        let (ptr, count) = tagged::unpack::<RegionHeader>(bits);
        if ptr.is_null() {
            debug_assert_eq!(count, HOHDEL, "a null target only ever means destroyed");
            return None;
        }
        let header = unsafe { ptr::NonNull::new_unchecked(ptr) };
        if region::try_acquire_use_if_live(header) {
            Some(unsafe { Region::from_raw(region::region_of::<T>(header)) })
        } else {
            None
        }
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        Weak {
            stub: self.stub.clone(),
            _marker: PhantomData,
        }
    }
}

/// The core destruction protocol, invoked
/// exactly once per region, the moment its refcount word's store- and
/// use-counts have both reached zero and its destroy-lock bit has been
/// claimed by the caller's [`region::urefs`] update.
///
/// # Safety
/// `header` must be the header of a region whose counts just reached zero
/// under a freshly-claimed destroy lock, and this function must not be
/// called twice for the same region.
pub(crate) unsafe fn try_destroy(header: ptr::NonNull<RegionHeader>) {
    let weak_cell = &header.as_ref().weak;
    match weak_cell.peek_ptr() {
        None => {
            tracing::trace!(header = ?header.as_ptr(), "destroying region, no weak stub published");
            region::run_destructor(header);
        }
        Some(stub_box) => {
            let stub_ref = stub_box.as_ref().data();
            // Cut the stub loose from the region it's about to outlive.
            // Any upgrade that reads this afterward sees `HOHDEL` and bails
            // before ever touching `header`'s refcount. The stub's own
            // store-count (held by `header`'s `weak` cell) is released when
            // that cell drops as part of `run_destructor` below, completing
            // steps 3-4 of the destruction protocol via ordinary `Drop`.
            stub_ref
                .target
                .swap(tagged::pack(ptr::null_mut::<RegionHeader>(), HOHDEL), AcqRel);
            tracing::debug!(header = ?header.as_ptr(), "destroying region, detached weak stub");
            region::run_destructor(header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_succeeds_while_strong_handle_lives() {
        let r = Region::new(42u32);
        let w = r.downgrade().expect("stub allocation does not fail here");
        let got = w.upgrade().expect("region still alive");
        assert_eq!(*got, 42);
        drop(got);
        drop(r);
        assert!(w.upgrade().is_none());
    }

    #[test]
    fn upgrade_fails_once_region_is_dropped() {
        let r = Region::new(String::from("hi"));
        let w = r.downgrade().expect("stub allocation does not fail here");
        drop(r);
        assert!(w.upgrade().is_none());
    }

    #[test]
    fn multiple_weaks_share_one_stub() {
        let r = Region::new(1u32);
        let w1 = r.downgrade().expect("stub allocation does not fail here");
        let w2 = r.downgrade().expect("stub allocation does not fail here");
        assert!(w1.upgrade().is_some());
        assert!(w2.upgrade().is_some());
        drop(r);
        assert!(w1.upgrade().is_none());
        assert!(w2.upgrade().is_none());
    }

    #[test]
    fn racing_release_and_upgrade_never_observe_a_third_outcome() {
        use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
        use std::thread;

        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Payload;
        impl Drop for Payload {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Relaxed);
            }
        }

        for _ in 0..2000 {
            DROPS.store(0, Relaxed);
            let r = Region::new(Payload);
            let w = r.downgrade().expect("stub allocation does not fail here");

            thread::scope(|scope| {
                scope.spawn(|| drop(r));
                scope.spawn(|| {
                    let upgraded = w.upgrade();
                    // Either the region was still alive at the moment of
                    // upgrade (in which case the destructor cannot have run
                    // yet, since this handle is itself keeping it alive)...
                    if upgraded.is_some() {
                        assert_eq!(DROPS.load(Relaxed), 0);
                    }
                    // ...or it had already been destroyed, in which case the
                    // destructor ran exactly once. No other interleaving is
                    // observable.
                    drop(upgraded);
                });
            });
            assert_eq!(DROPS.load(Relaxed), 1);
        }
    }
}
