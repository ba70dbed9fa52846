//! Error types.
//!
//! Two severities exist. [`AllocError`] and [`BackingError`] are
//! recoverable: the allocator state stays consistent and the caller sees a
//! null pointer. [`Misuse`] is never returned across the public release
//! path; it describes the programmer error that made the allocator abort.

use thiserror::Error;

use crate::size_class::ClassId;

/// Failure reported by a [`BackingStore`](crate::backing::BackingStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackingError {
    /// The operating system refused the mapping.
    #[error("mmap of {size} bytes failed (errno {errno})")]
    MapFailed { size: usize, errno: i32 },
    /// The configured backing budget would be exceeded.
    #[error("backing budget exceeded: requested {requested} with {mapped} of {limit} bytes mapped")]
    LimitExceeded {
        requested: usize,
        mapped: usize,
        limit: usize,
    },
    /// Rounding the request to the mapping granularity overflowed.
    #[error("request of {requested} bytes overflows granularity rounding")]
    SizeOverflow { requested: usize },
    /// The operating system refused to drop the pages of a region.
    #[error("decommit of {size} bytes at {addr:#x} failed (errno {errno})")]
    ReserveFailed { addr: usize, size: usize, errno: i32 },
    /// The operating system refused to unmap a region.
    #[error("munmap of {size} bytes at {addr:#x} failed (errno {errno})")]
    UnmapFailed { addr: usize, size: usize, errno: i32 },
}

/// Recoverable allocation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Request is larger than the maximum single allocation.
    #[error("request of {requested} bytes exceeds the maximum allocation of {max} bytes")]
    OutOfRange { requested: usize, max: usize },
    /// The backing store could not supply fresh memory.
    #[error("backing store exhausted: {0}")]
    Exhausted(#[from] BackingError),
    /// Every arena identifier of this instance has been handed out.
    #[error("arena identifiers exhausted")]
    ArenaIdsExhausted,
}

/// Detected allocator misuse. Always fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Misuse {
    /// Address lies outside every arena owned by this allocator.
    #[error("release of foreign pointer {addr:#x} not owned by any arena")]
    ForeignPointer { addr: usize },
    /// Address lies inside an arena but cannot be the start of a chunk.
    #[error("release of pointer {addr:#x} that does not address the start of a chunk")]
    NotChunkStart { addr: usize },
    /// The header in front of the pointer is not one this allocator wrote.
    #[error("release of pointer {addr:#x} with a corrupt or missing chunk header")]
    CorruptHeader { addr: usize },
    /// The chunk is already on its free list.
    #[error("double free of pointer {addr:#x} (class {class})")]
    DoubleFree { addr: usize, class: ClassId },
    /// A chunk popped from a free list was not a valid free chunk.
    #[error("free list of class {class} corrupted at {addr:#x} (write after free?)")]
    CorruptFreeList { addr: usize, class: ClassId },
    /// Walking an arena disagrees with its recorded live chunk count.
    #[error("arena at {addr:#x} records {recorded} live chunks but holds {walked}")]
    InconsistentArena {
        addr: usize,
        recorded: usize,
        walked: usize,
    },
}

impl Misuse {
    /// Stable event name used in lifecycle records.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::ForeignPointer { .. } => "foreign_pointer",
            Self::NotChunkStart { .. } => "not_chunk_start",
            Self::CorruptHeader { .. } => "corrupt_header",
            Self::DoubleFree { .. } => "double_free_detected",
            Self::CorruptFreeList { .. } => "corrupt_free_list",
            Self::InconsistentArena { .. } => "inconsistent_arena",
        }
    }

    /// Address the misuse was detected at.
    #[must_use]
    pub const fn addr(&self) -> usize {
        match *self {
            Self::ForeignPointer { addr }
            | Self::NotChunkStart { addr }
            | Self::CorruptHeader { addr }
            | Self::DoubleFree { addr, .. }
            | Self::CorruptFreeList { addr, .. }
            | Self::InconsistentArena { addr, .. } => addr,
        }
    }
}

/// Malformed allocator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?} as a byte size")]
    InvalidSize { var: &'static str, value: String },
    #[error("{var}: cannot parse {value:?} as an integer")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var}: cannot parse {value:?} as a boolean")]
    InvalidBool { var: &'static str, value: String },
    #[error("max_allocation {value} is below the required minimum of {min} bytes")]
    MaxAllocationTooSmall { value: usize, min: usize },
    #[error("arena_size {value} is below the required minimum of {min} bytes")]
    ArenaTooSmall { value: usize, min: usize },
}
