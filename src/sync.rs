//! CPU-pause hint and "yield to scheduler", the bounded spin-overflow
//! escapes used by [`crate::arcp`] and [`crate::alloc`].
//!
//! `std::sync::atomic`'s own API already matches the shim's contract (typed
//! load/store/swap/CAS/fetch-op with explicit memory orders), so
//! `crate::tagged`/`crate::region` use it directly with no wrapper type.

use std::hint;

/// CPU-pause hint for tight spin loops (maps to a `pause`/`yield` instruction
/// where the target supports one, a no-op otherwise).
#[inline]
pub fn cpu_relax() {
    hint::spin_loop();
}

/// Yield the current thread to the scheduler. Used only on the rare
/// overflow path where a pending-count would otherwise saturate: bounded
/// by the number of threads contending on a single cell, never on the hot
/// uncontended path.
#[inline]
pub fn yield_to_scheduler() {
    std::thread::yield_now();
}
