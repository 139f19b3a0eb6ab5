//! Compile-time tunables for the allocator and the tagged-pointer scheme.
//!
//! This is purely an in-memory library (no CLI, no env vars, no persistent
//! state), so "configuration" is a handful of `const`s rather than a runtime
//! layer.

/// OS page size assumed by the allocator's mmap/munmap paths.
pub const PAGE_SIZE: usize = 4096;

/// Smallest chunk a bin will ever hand out.
pub const MIN_CHUNK: usize = 16;

/// Number of size-class bins: 16, 32, 64, ..., 8192.
pub const NUM_BINS: usize = 10;

/// Allocations strictly larger than this go straight to the OS via mmap;
/// allocations at or below are served from the bin of the smallest
/// power-of-two size class that fits.
///
/// Fixed here as a single compile-time constant rather than a runtime
/// parameter (see DESIGN.md for the rationale behind the chosen value).
pub const OS_THRESHOLD: usize = 2048;

/// Number of low bits of a tagged pointer reserved for the pending-count.
///
/// Every region is boxed behind a type forced to 8-byte alignment
/// (`RegionBox<T>` carries `#[repr(align(8))]`), so 3 tag bits are always
/// available regardless of `T`'s own alignment.
pub const TAG_BITS: u32 = 3;

/// Mask selecting the pending-count bits of a tagged pointer (`0b111 = 7`).
pub const COUNTMASK: usize = (1 << TAG_BITS) - 1;

/// Reserved pending-count value: "hand-over-hand delete" in progress, the
/// weak reference's target must be treated as already gone.
pub const HOHDEL: usize = COUNTMASK;

/// Largest pending-count a loader may install without spinning for a drain.
pub const COUNT_MAX: usize = COUNTMASK - 1;
