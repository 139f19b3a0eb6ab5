//! The ARCP cell: one atomic tagged pointer whose low
//! bits carry a pending-count of not-yet-migrated use-counts.
//!
//! This is the hard core the rest of the crate (the queue, the allocator's
//! free-stacks, the COW collections' backing slots) is built on top of,
//! directly on `std::sync::atomic` primitives.

use std::ptr::NonNull;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, SeqCst};

use crate::config::COUNT_MAX;
use crate::region::{self, Region, RegionBox};
use crate::sync::{cpu_relax, yield_to_scheduler};
use crate::tagged::{self, TaggedPtr};
use crate::weak::try_destroy;

/// An atomic reference-counted pointer cell.
pub struct Arcp<T> {
    ptr: TaggedPtr<RegionBox<T>>,
}

impl<T> Arcp<T> {
    /// An empty cell (holds no region).
    pub const fn null() -> Self {
        Self {
            ptr: TaggedPtr::new(std::ptr::null_mut()),
        }
    }

    /// Wraps an initial region, adding one store-count contribution and
    /// publishing it with release semantics (`init`).
    pub fn new(region: Region<T>) -> Self {
        region::acquire_store(region.header_ptr());
        let cell = Self {
            ptr: TaggedPtr::new(region.as_box_ptr().as_ptr()),
        };
        // `region`'s own use-count handle is separate from the store-count
        // bump above; dropping it here just releases that use-count, the
        // same as any other caller giving up a handle once they're done
        // with it — references are never implicitly released.
        drop(region);
        cell
    }

    fn raw_ptr(&self, bits: usize) -> Option<NonNull<RegionBox<T>>> {
        let (ptr, _) = tagged::unpack::<RegionBox<T>>(bits);
        NonNull::new(ptr)
    }

    /// Raw peek of the cell's pointer, ignoring the pending-count entirely.
    /// Sound only where the caller has already established there is no
    /// concurrent writer — the destruction protocol's read of a region's
    /// (by-then-stable) weak cell.
    pub(crate) fn peek_ptr(&self) -> Option<NonNull<RegionBox<T>>> {
        self.raw_ptr(self.ptr.load(Acquire))
    }

    /// Atomically publishes `candidate` into this cell if and only if it is
    /// currently empty. `candidate`'s one use-count is converted into the
    /// cell's store-count contribution on success; on either outcome
    /// `candidate` is dropped at the end of this call, releasing whichever
    /// count it still holds. Returns whether the publish won the race.
    pub(crate) fn try_publish_once(&self, candidate: Region<T>) -> bool {
        let desired = tagged::pack(candidate.as_box_ptr().as_ptr(), 0);
        let won = self.ptr.compare_exchange(0, desired, AcqRel, Acquire).is_ok();
        if won {
            region::acquire_store(candidate.header_ptr());
        }
        won
    }

    /// The ABA-free load algorithm: install a pending-count bit, acquire a
    /// use-count on whatever we saw, then try to retract the pending bit —
    /// retrying the drain only if a concurrent writer is still migrating it.
    pub fn load(&self) -> Option<Region<T>> {
        let mut bits = self.ptr.load(Acquire);
        loop {
            let (_, k) = tagged::unpack::<RegionBox<T>>(bits);
            if k == COUNT_MAX {
                // Too many concurrent loaders have a pending-count on this
                // cell; yield to the scheduler rather than spin, bounded by
                // however many threads are actually contending on it.
                yield_to_scheduler();
                bits = self.ptr.load(Acquire);
                continue;
            }
            match self.ptr.compare_exchange_weak(bits, bits + 1, AcqRel, Acquire) {
                Ok(_) => {
                    bits += 1;
                    break;
                }
                Err(cur) => {
                    bits = cur;
                    cpu_relax();
                }
            }
        }
        let raw_ptr = self.raw_ptr(bits);
        if let Some(p) = raw_ptr {
            region::acquire_use(region::header_of(p));
        }
        loop {
            match self.ptr.compare_exchange_weak(bits, bits - 1, AcqRel, Acquire) {
                Ok(_) => break,
                Err(cur) => {
                    bits = cur;
                    let (cur_ptr, cur_k) = tagged::unpack::<RegionBox<T>>(bits);
                    let same_ptr = raw_ptr.map(|p| p.as_ptr()) == Some(cur_ptr)
                        || (raw_ptr.is_none() && cur_ptr.is_null());
                    if !same_ptr || cur_k == 0 {
                        // Someone else's store/swap/cas already migrated (or
                        // will migrate) our pending contribution into the
                        // region's own use-count; retract the one we added
                        // above so it isn't counted twice.
                        if let Some(p) = raw_ptr {
                            region::release_use(region::header_of(p));
                        }
                        break;
                    }
                    // Otherwise: still the same pointer, still a nonzero
                    // pending count — just contention, retry the drain.
                    cpu_relax();
                }
            }
        }
        raw_ptr.map(|p| unsafe { Region::from_raw(p) })
    }

    /// Returns the region pointer without touching any counts. The caller
    /// must not dereference past a concurrent store and may only use this
    /// for pointer-identity comparisons (`load_phantom`).
    pub fn load_phantom(&self) -> Option<NonNull<RegionBox<T>>> {
        self.raw_ptr(self.ptr.load(Acquire))
    }

    /// Unconditionally replaces the cell's contents (`store`).
    pub fn store(&self, new: Option<Region<T>>) {
        if let Some(r) = &new {
            region::acquire_store(r.header_ptr());
        }
        let desired = tagged::pack(new.as_ref().map(|r| r.as_box_ptr().as_ptr()).unwrap_or(std::ptr::null_mut()), 0);
        // `new`'s own use-count handle is separate from the store-count bump
        // above (same split as `Arcp::new`); drop it so that use-count is
        // actually released instead of orphaned.
        drop(new);
        let displaced = self.ptr.swap(desired, SeqCst);
        self.retire_displaced(displaced, true);
    }

    /// Like `store`, but returns the displaced region as a strong (one
    /// use-count) handle (`swap`).
    pub fn swap(&self, new: Option<Region<T>>) -> Option<Region<T>> {
        if let Some(r) = &new {
            region::acquire_store(r.header_ptr());
        }
        let desired = tagged::pack(new.as_ref().map(|r| r.as_box_ptr().as_ptr()).unwrap_or(std::ptr::null_mut()), 0);
        drop(new);
        let displaced = self.ptr.swap(desired, AcqRel);
        let (old_ptr, k) = tagged::unpack::<RegionBox<T>>(displaced);
        let old = NonNull::new(old_ptr)?;
        // -1 store (retiring the cell's slot), +k (migrating pending loads),
        // +1 (the handle we are about to hand back) — the total can never
        // reach zero here because we are granting a live reference, so no
        // destroy check is needed.
        region::urefs(region::header_of(old), -1, k as i32 + 1);
        Some(unsafe { Region::from_raw(old) })
    }

    fn retire_displaced(&self, displaced: usize, check_destroy: bool) {
        let (old_ptr, k) = tagged::unpack::<RegionBox<T>>(displaced);
        if let Some(old) = NonNull::new(old_ptr) {
            let header = region::header_of(old);
            let destroy = region::urefs(header, -1, k as i32);
            if check_destroy && destroy {
                unsafe { try_destroy(header) };
            }
        }
    }

    /// Compare-and-swap by region identity. Does not write the observed
    /// value back into `expected` on failure —
    /// the caller's own `expected`/`new` handles are left exactly as they
    /// were. Never triggers destruction — the caller is assumed to still
    /// hold their own reference to `expected` throughout the call, so the
    /// retiring update can never reach zero.
    ///
    /// Either side may be `None` to mean "the cell is empty" — this is how
    /// the queue CAS-installs its first node onto a sentinel's `next`.
    pub fn cas(&self, expected: Option<&Region<T>>, new: Option<&Region<T>>) -> bool {
        if let Some(n) = new {
            region::acquire_store(n.header_ptr());
        }
        let expected_ptr = expected.map(|r| r.as_box_ptr().as_ptr()).unwrap_or(std::ptr::null_mut());
        let new_ptr = new.map(|r| r.as_box_ptr().as_ptr()).unwrap_or(std::ptr::null_mut());
        let mut bits = self.ptr.load(Acquire);
        loop {
            let (cur_ptr, _) = tagged::unpack::<RegionBox<T>>(bits);
            if cur_ptr != expected_ptr {
                if let Some(n) = new {
                    region::release_store(n.header_ptr());
                }
                return false;
            }
            let desired = tagged::pack(new_ptr, 0);
            match self.ptr.compare_exchange_weak(bits, desired, AcqRel, Acquire) {
                Ok(_) => break,
                Err(cur) => bits = cur,
            }
        }
        let (_, k) = tagged::unpack::<RegionBox<T>>(bits);
        if let Some(e) = expected {
            let destroyable = region::urefs(e.header_ptr(), -1, k as i32);
            debug_assert!(!destroyable, "caller must still hold its own reference to `expected`");
        }
        true
    }

    /// `cas`, but fully consumes both `expected` and `new` regardless of
    /// outcome (releasing the caller's own reference to each), folding the
    /// accounting into a single refcount update per side where possible.
    pub fn cas_release(&self, expected: Region<T>, new: Region<T>) -> bool {
        // Pre-fold: +1 store (the cell's new slot), -1 use (new's handle,
        // being given up by the caller as part of this call).
        region::urefs(new.header_ptr(), 1, -1);
        let mut bits = self.ptr.load(Acquire);
        let ok = loop {
            let (cur_ptr, _) = tagged::unpack::<RegionBox<T>>(bits);
            if cur_ptr != expected.as_box_ptr().as_ptr() {
                if region::urefs(new.header_ptr(), -1, 0) {
                    unsafe { try_destroy(new.header_ptr()) };
                }
                region::release_use(expected.header_ptr());
                break false;
            }
            let desired = tagged::pack(new.as_box_ptr().as_ptr(), 0);
            match self.ptr.compare_exchange_weak(bits, desired, AcqRel, Acquire) {
                Ok(_) => break true,
                Err(cur) => bits = cur,
            }
        };
        if ok {
            let (_, k) = tagged::unpack::<RegionBox<T>>(bits);
            // -1 store (retiring the old slot), +k (migrate pending loads),
            // -1 use (expected's handle, given up by the caller).
            if region::urefs(expected.header_ptr(), -1, k as i32 - 1) {
                unsafe { try_destroy(expected.header_ptr()) };
            }
        }
        std::mem::forget(expected);
        std::mem::forget(new);
        ok
    }
}

impl<T> Drop for Arcp<T> {
    fn drop(&mut self) {
        let displaced = self.ptr.load(Relaxed);
        self.retire_displaced(displaced, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn sequential_load_then_clear_runs_destructor() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Payload(&'static str);
        impl Drop for Payload {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Relaxed);
            }
        }

        let a = Region::new(Payload("hello"));
        let cell = Arcp::new(a);

        let loaded = cell.load().expect("cell holds a region");
        assert_eq!(loaded.0, "hello");
        drop(loaded);
        assert_eq!(DROPS.load(Relaxed), 0);

        cell.store(None);
        assert_eq!(DROPS.load(Relaxed), 1);
    }

    #[test]
    fn store_and_swap_release_the_installed_regions_use_count() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Payload(u32);
        impl Drop for Payload {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Relaxed);
            }
        }

        let cell = Arcp::null();
        cell.store(Some(Region::new(Payload(1))));
        cell.store(Some(Region::new(Payload(2))));
        assert_eq!(DROPS.load(Relaxed), 1, "storing over a region must drop the displaced one");
        cell.store(None);
        assert_eq!(DROPS.load(Relaxed), 2, "clearing the cell must drop the remaining region");

        let old = cell.swap(Some(Region::new(Payload(3))));
        assert!(old.is_none());
        let displaced = cell.swap(None).unwrap();
        assert_eq!(displaced.0, 3);
        drop(displaced);
        assert_eq!(DROPS.load(Relaxed), 3, "the region installed via swap must still be destroyable");
    }

    #[test]
    fn swap_returns_old_and_installs_new() {
        let a = Region::new(1u32);
        let b = Region::new(2u32);
        let cell = Arcp::new(a);
        let old = cell.swap(Some(b)).unwrap();
        assert_eq!(*old, 1);
        let cur = cell.load().unwrap();
        assert_eq!(*cur, 2);
    }

    #[test]
    fn cas_succeeds_only_on_match() {
        let a = Region::new(1u32);
        let b = Region::new(2u32);
        let c = Region::new(3u32);
        let cell = Arcp::new(a.clone());

        assert!(!cell.cas(Some(&b), Some(&c)));
        assert!(cell.cas(Some(&a), Some(&b)));
        let cur = cell.load().unwrap();
        assert_eq!(*cur, 2);
    }

    #[test]
    fn many_concurrent_loads_keep_progress() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let cell = StdArc::new(Arcp::new(Region::new(7u32)));
        thread::scope(|scope| {
            for _ in 0..16 {
                let cell = StdArc::clone(&cell);
                scope.spawn(move || {
                    for _ in 0..1000 {
                        let r = cell.load().unwrap();
                        assert_eq!(*r, 7);
                    }
                });
            }
        });
    }
}
