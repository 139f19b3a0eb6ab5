//! The size-class allocator: page-backed size classes with a
//! lock-free free-stack per bin, exposed through `amalloc`/`afree`/
//! `arealloc`/`atryrealloc`.
//!
//! This module is the crate's one genuinely raw-pointer-and-bytes
//! component — everything above it (`Region`, the queue, the COW
//! collections) is built on `Box`/`Vec` and never touches these functions
//! directly (see DESIGN.md). It stands on its own, exercised by its own
//! tests.

use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};

use crate::config::{NUM_BINS, OS_THRESHOLD, PAGE_SIZE};
use crate::sync::cpu_relax;
use crate::tagged::{self, TaggedPtr};

const MIN_CHUNK_LOG2: u32 = 4; // MIN_CHUNK = 16

const _: () = assert!(NUM_BINS == 10, "BINS below is hand-unrolled for NUM_BINS == 10");

fn page_ceil(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// `ceil(log2(size / MIN_CHUNK))`, i.e. the bin whose size is the smallest
/// power-of-two >= `size`.
fn size2bin(size: usize) -> usize {
    debug_assert!(size > 0 && size <= OS_THRESHOLD);
    let mut size = size - 1;
    size >>= MIN_CHUNK_LOG2 - 1;
    let mut bin = 0usize;
    loop {
        size >>= 1;
        if size == 0 {
            break;
        }
        bin += 1;
    }
    bin
}

fn bin2size(bin: usize) -> usize {
    1usize << (bin as u32 + MIN_CHUNK_LOG2)
}

/// A chunk sitting on a free-stack. Only ever valid while linked into a
/// [`FreeStack`] or just popped off one — the allocator never reads `next`
/// through any other path.
struct FreeChunk {
    next: *mut FreeChunk,
}

/// One size class's free list: a Treiber stack whose top pointer is tagged
/// with a small rolling counter for ABA-safety, reusing
/// [`crate::tagged::TaggedPtr`] rather than a dedicated item-level ABA
/// scheme, unifying the allocator's free-stack races and the ARCP cell's
/// tagged-pointer protocol behind the same abstraction.
///
/// This deliberately does not implement a per-item contention-refcount
/// "helping" dance to let a freed pointer be safely reused the instant
/// it's unlinked — `Arcp`'s cell already implements that exact
/// migration/drain machinery where it's actually needed. Bin memory here is
/// carved from pages that are never returned to the OS, so the classic
/// Treiber-stack tagged-counter is sufficient: the plain CAS-retry loop
/// below is still lock-free and wait-free except for contention, and needs
/// no item-level refcount.
struct FreeStack {
    top: TaggedPtr<FreeChunk>,
}

impl FreeStack {
    const fn new() -> Self {
        Self {
            top: TaggedPtr::new(ptr::null_mut()),
        }
    }

    /// # Safety
    /// `chunk` must point at a live allocation of at least
    /// `size_of::<FreeChunk>()` bytes that the caller is relinquishing.
    unsafe fn push(&self, chunk: NonNull<u8>) {
        let chunk_ptr = chunk.as_ptr() as *mut FreeChunk;
        loop {
            let bits = self.top.load(Acquire);
            let (top_ptr, tag) = tagged::unpack::<FreeChunk>(bits);
            unsafe { (*chunk_ptr).next = top_ptr };
            let desired = tagged::pack(chunk_ptr, tag.wrapping_add(1) & crate::config::COUNTMASK);
            if self.top.compare_exchange_weak(bits, desired, AcqRel, Relaxed).is_ok() {
                return;
            }
            cpu_relax();
        }
    }

    fn pop(&self) -> Option<NonNull<u8>> {
        loop {
            let bits = self.top.load(Acquire);
            let (top_ptr, tag) = tagged::unpack::<FreeChunk>(bits);
            let top = NonNull::new(top_ptr)?;
            let next = unsafe { top.as_ref().next };
            let desired = tagged::pack(next, tag.wrapping_add(1) & crate::config::COUNTMASK);
            if self.top.compare_exchange_weak(bits, desired, AcqRel, Relaxed).is_ok() {
                return Some(unsafe { NonNull::new_unchecked(top.as_ptr() as *mut u8) });
            }
            cpu_relax();
        }
    }
}

unsafe impl Send for FreeStack {}
unsafe impl Sync for FreeStack {}

static BINS: [FreeStack; NUM_BINS] = [
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
    FreeStack::new(),
];

#[cfg(target_os = "linux")]
fn os_alloc(size: usize) -> Option<NonNull<u8>> {
    let len = page_ceil(size);
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        tracing::debug!(bytes = len, "amalloc: os_alloc failed");
        None
    } else {
        tracing::trace!(bytes = len, ptr = ?ptr, "amalloc: os_alloc");
        NonNull::new(ptr as *mut u8)
    }
}

/// # Safety
/// `ptr` must be a live mapping previously returned by [`os_alloc`] (or
/// [`os_realloc`]) with the same `size`.
#[cfg(target_os = "linux")]
unsafe fn os_free(ptr: NonNull<u8>, size: usize) {
    let len = page_ceil(size);
    let rc = unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, len) };
    debug_assert_eq!(rc, 0, "munmap failed; memory may be leaking");
    tracing::trace!(bytes = len, ptr = ?ptr.as_ptr(), "afree: os_free");
}

/// Shrinks an OS-thresholded mapping in place by unmapping trailing pages;
/// never grows in place: reallocations shrink in place via unmap of
/// trailing pages but must move on growth.
#[cfg(target_os = "linux")]
fn os_tryrealloc(ptr: NonNull<u8>, oldsize: usize, newsize: usize) -> bool {
    let old_pages = page_ceil(oldsize);
    let new_pages = page_ceil(newsize);
    if old_pages == new_pages {
        return true;
    }
    if old_pages < new_pages {
        return false;
    }
    let tail = unsafe { ptr.as_ptr().add(new_pages) };
    let rc = unsafe { libc::munmap(tail as *mut libc::c_void, old_pages - new_pages) };
    debug_assert_eq!(rc, 0, "munmap failed during in-place shrink; memory may be leaking");
    true
}

#[cfg(target_os = "linux")]
unsafe fn os_realloc(ptr: NonNull<u8>, oldsize: usize, newsize: usize) -> Option<NonNull<u8>> {
    if os_tryrealloc(ptr, oldsize, newsize) {
        return Some(ptr);
    }
    let fresh = os_alloc(newsize)?;
    unsafe {
        ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), oldsize.min(newsize));
        os_free(ptr, oldsize);
    }
    Some(fresh)
}

/// Subdivides `chunk` (of `bin2size(from_bin)` bytes) down to `to_bin`,
/// pushing each discarded upper half onto its own bin's free-stack and
/// returning the (unmoved) lower half sized to `to_bin`: a buddy-like
/// split that is never re-merged.
fn split_down(chunk: NonNull<u8>, from_bin: usize, to_bin: usize) -> NonNull<u8> {
    let mut i = from_bin;
    while i > to_bin {
        i -= 1;
        let half_size = bin2size(i);
        let upper_half = unsafe { chunk.as_ptr().add(half_size) };
        unsafe { BINS[i].push(NonNull::new_unchecked(upper_half)) };
    }
    chunk
}

/// Allocates `size` bytes. Requests above [`crate::config::OS_THRESHOLD`]
/// go straight to the OS; smaller requests are served from (and, if
/// necessary, split down from) the bin free-stacks. `size == 0` returns
/// `None`.
pub fn amalloc(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    if size > OS_THRESHOLD {
        return os_alloc(size);
    }
    let bin = size2bin(size);
    for i in bin..NUM_BINS {
        if let Some(chunk) = BINS[i].pop() {
            return Some(split_down(chunk, i, bin));
        }
    }
    let fresh = os_alloc(bin2size(NUM_BINS - 1))?;
    Some(split_down(fresh, NUM_BINS - 1, bin))
}

/// Frees a region previously returned by [`amalloc`]/[`arealloc`]. A `None`
/// pointer or a zero `size` is a no-op.
///
/// # Safety
/// `ptr` (if present) must be a live allocation of exactly `size` bytes
/// obtained from this module's allocation functions, not freed before.
pub unsafe fn afree(ptr: Option<NonNull<u8>>, size: usize) {
    let Some(ptr) = ptr else { return };
    if size == 0 {
        return;
    }
    if size > OS_THRESHOLD {
        unsafe { os_free(ptr, size) };
    } else {
        unsafe { BINS[size2bin(size)].push(ptr) };
    }
}

/// Reports whether an in-place reallocation from `oldsize` to `newsize`
/// would succeed without actually performing it (`tryrealloc`): true iff
/// both sizes are OS-thresholded and the new page
/// count is no greater than the old, or both sizes land in the same bin.
pub fn atryrealloc(ptr: NonNull<u8>, oldsize: usize, newsize: usize) -> bool {
    if oldsize == 0 && newsize == 0 {
        return true;
    }
    if oldsize > OS_THRESHOLD && newsize > OS_THRESHOLD {
        return os_tryrealloc(ptr, oldsize, newsize);
    }
    if oldsize > 0 && oldsize <= OS_THRESHOLD && newsize > 0 && newsize <= OS_THRESHOLD {
        return size2bin(oldsize) == size2bin(newsize);
    }
    false
}

/// Reallocates `ptr` from `oldsize` to `newsize`. `oldsize == 0` allocates;
/// `newsize == 0` frees (returning the now-dangling `ptr` unchanged so
/// callers can still match it against their bookkeeping); otherwise grows
/// or shrinks, possibly moving.
///
/// # Safety
/// Same preconditions as [`afree`] for the `ptr`/`oldsize` pair.
pub unsafe fn arealloc(
    ptr: Option<NonNull<u8>>,
    oldsize: usize,
    newsize: usize,
) -> Option<NonNull<u8>> {
    if oldsize == 0 {
        if newsize == 0 {
            return ptr;
        }
        return amalloc(newsize);
    }
    let ptr = ptr.expect("arealloc: oldsize > 0 implies a live ptr");
    if newsize == 0 {
        unsafe { afree(Some(ptr), oldsize) };
        return Some(ptr);
    }
    if oldsize > OS_THRESHOLD && newsize > OS_THRESHOLD {
        return unsafe { os_realloc(ptr, oldsize, newsize) };
    }
    if oldsize <= OS_THRESHOLD && newsize <= OS_THRESHOLD && size2bin(oldsize) == size2bin(newsize)
    {
        return Some(ptr);
    }
    let fresh = amalloc(newsize)?;
    unsafe {
        ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), oldsize.min(newsize));
        afree(Some(ptr), oldsize);
    }
    Some(fresh)
}
