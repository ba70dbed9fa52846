//! # segalloc-abi
//!
//! C-callable boundary for the segregated free-list allocator.
//!
//! This crate produces a `cdylib` exporting `alloc`, `dealloc` and
//! `alloc_usable_size`. All three route into one process-wide
//! [`segalloc_core::Allocator`] behind a lock.
//!
//! ```text
//! C caller -> alloc/dealloc (this crate) -> global lock -> Allocator -> return
//! ```

pub mod alloc_abi;
pub mod global;

pub use alloc_abi::{alloc, alloc_usable_size, dealloc};
pub use global::with_global;
