//! `arcp`: a lock-free atomic reference-counted pointer (ARCP) with strong
//! and weak references, a Michael–Scott MPMC FIFO queue built on top of it,
//! a page-backed size-class allocator with per-size lock-free free-stacks,
//! and two copy-on-write collections (an array and a sorted dictionary)
//! that exercise ARCP's ownership model end to end.
//!
//! Reclamation throughout is driven solely by the refcount protocol in
//! [`arcp`] — there is no hazard-pointer or epoch-based scheme, and no
//! general-purpose allocator (fragmented large pages are never returned to
//! the OS; bins never shrink).
//!
//! See `DESIGN.md` in the repository root for per-module design notes.

pub mod alloc;
pub mod arcp;
pub mod array;
pub mod config;
pub mod dict;
pub mod queue;
pub mod region;
mod sync;
mod tagged;
pub mod weak;

pub use arcp::Arcp;
pub use array::Array;
pub use dict::{Dict, Key, Lookup};
pub use queue::Queue;
pub use region::Region;
pub use weak::Weak;
