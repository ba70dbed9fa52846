//! # segalloc-core
//!
//! Segregated free-list allocator.
//!
//! Requests are rounded up to a fixed table of size classes. Small classes
//! are carved out of shared slab arenas, large classes get one dedicated
//! arena per chunk. Released chunks go onto a per-class LIFO free list and
//! are handed out again before fresh memory is mapped.
//!
//! Every chunk carries a 16-byte in-band header (canary, class, state,
//! arena id). Before a release touches that header, the pointer is resolved
//! against the arena registry, so foreign addresses are rejected without
//! being read. Double frees and invalid frees are fatal: [`Allocator::release`]
//! writes a diagnostic and aborts. [`Allocator::validate`] and
//! [`Allocator::try_release`] expose the same checks without aborting.
//!
//! Out-of-range requests and backing-store exhaustion are recoverable and
//! surface as [`AllocError`] (or a null pointer from [`Allocator::allocate`]).

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod allocator;
pub mod arena;
#[allow(unsafe_code)]
pub mod backing;
pub mod config;
pub mod error;
pub mod fatal;
#[allow(unsafe_code)]
pub mod free_list;
#[allow(unsafe_code)]
pub mod header;
pub mod log;
pub mod size_class;

pub use allocator::{Allocator, AllocatorStats, ChunkInfo, HeapReport, POISON_BYTE};
pub use arena::{ArenaId, ArenaKind};
pub use backing::{BackingStore, MmapBackingStore, Region};
pub use config::AllocatorConfig;
pub use error::{AllocError, BackingError, ConfigError, Misuse};
pub use header::{ALIGNMENT, HEADER_SIZE};
pub use log::{AllocatorLogLevel, AllocatorLogRecord, CounterSnapshot};
pub use size_class::{ClassId, SizeClassTable};
