//! In-band chunk header.
//!
//! Every chunk starts with a 16-byte header followed by the usable bytes:
//!
//! ```text
//!   ┌──────────────┬───────┬───────┬──────┬──────────┬──────────────────┐
//!   │ canary (u64) │ class │ state │ rsvd │ arena id │  usable bytes …  │
//!   │    8 bytes   │  u16  │  u8   │  u8  │   u32    │                  │
//!   └──────────────┴───────┴───────┴──────┴──────────┴──────────────────┘
//!                                                     ▲
//!                                                     └── pointer returned to caller
//! ```
//!
//! The canary mixes a magic constant with the header address, class and
//! arena id, so a header copied elsewhere or a stray pointer into user data
//! does not validate. While a chunk is FREE, the first word of its usable
//! bytes holds the free-list link.

use std::ptr::NonNull;

use crate::arena::ArenaId;
use crate::size_class::ClassId;

/// Size of the in-band header. Keeps user pointers 16-byte aligned.
pub const HEADER_SIZE: usize = 16;

/// Alignment of every pointer returned to callers.
pub const ALIGNMENT: usize = 16;

const CHUNK_MAGIC: u64 = 0x5E6A_11C0_C4A7_D00D;

const STATE_FREE: u8 = 0xF7;
const STATE_ALLOCATED: u8 = 0xA1;

/// Chunk allocation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Free,
    Allocated,
}

impl ChunkState {
    const fn to_byte(self) -> u8 {
        match self {
            Self::Free => STATE_FREE,
            Self::Allocated => STATE_ALLOCATED,
        }
    }

    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            STATE_FREE => Some(Self::Free),
            STATE_ALLOCATED => Some(Self::Allocated),
            _ => None,
        }
    }
}

/// On-memory header layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    canary: u64,
    class: u16,
    state: u8,
    reserved: u8,
    arena: u32,
}

const _: () = assert!(std::mem::size_of::<ChunkHeader>() == HEADER_SIZE);

impl ChunkHeader {
    /// Builds a header for a chunk whose header sits at `addr`.
    #[must_use]
    pub fn new(addr: usize, class: ClassId, state: ChunkState, arena: ArenaId) -> Self {
        let class = class as u16;
        Self {
            canary: canary_for(addr, class, arena),
            class,
            state: state.to_byte(),
            reserved: 0,
            arena,
        }
    }

    /// True when this header was written by us at `addr`.
    #[must_use]
    pub fn canary_matches(&self, addr: usize) -> bool {
        self.canary == canary_for(addr, self.class, self.arena)
    }

    #[must_use]
    pub fn class(&self) -> ClassId {
        ClassId::from(self.class)
    }

    #[must_use]
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    /// Decoded state, or `None` if the state byte is garbage.
    #[must_use]
    pub fn state(&self) -> Option<ChunkState> {
        ChunkState::from_byte(self.state)
    }
}

fn canary_for(addr: usize, class: u16, arena: ArenaId) -> u64 {
    // splitmix64 finalizer over the identifying fields.
    let mut x = CHUNK_MAGIC ^ (addr as u64) ^ (u64::from(class) << 48) ^ (u64::from(arena) << 16);
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Pointer to a chunk header inside an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPtr(NonNull<ChunkHeader>);

impl ChunkPtr {
    /// # Safety
    ///
    /// `addr` must be non-zero, `ALIGNMENT`-aligned, and address at least
    /// `HEADER_SIZE + size_of::<usize>()` mapped bytes owned by the allocator.
    #[must_use]
    pub unsafe fn from_addr(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut ChunkHeader).map(Self)
    }

    /// Chunk for a user pointer previously returned by [`ChunkPtr::user_ptr`].
    ///
    /// # Safety
    ///
    /// Same contract as [`ChunkPtr::from_addr`] for `user - HEADER_SIZE`.
    #[must_use]
    pub unsafe fn from_user(user: usize) -> Option<Self> {
        // SAFETY: forwarded contract.
        user.checked_sub(HEADER_SIZE)
            .and_then(|addr| unsafe { Self::from_addr(addr) })
    }

    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// First usable byte.
    #[must_use]
    pub fn user_ptr(self) -> NonNull<u8> {
        // SAFETY: the header is followed by the usable bytes of the same
        // mapping, so the offset stays in bounds and non-null.
        unsafe { NonNull::new_unchecked(self.0.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// # Safety
    ///
    /// The header bytes must be mapped.
    #[must_use]
    pub unsafe fn read(self) -> ChunkHeader {
        // SAFETY: caller guarantees the header is mapped and aligned.
        unsafe { self.0.as_ptr().read() }
    }

    /// # Safety
    ///
    /// The header bytes must be mapped and owned by the allocator.
    pub unsafe fn write(self, header: ChunkHeader) {
        // SAFETY: caller guarantees exclusive access to the header.
        unsafe { self.0.as_ptr().write(header) }
    }

    /// Rewrites only the state byte.
    ///
    /// # Safety
    ///
    /// See [`ChunkPtr::write`].
    pub unsafe fn set_state(self, state: ChunkState) {
        // SAFETY: caller guarantees exclusive access to the header.
        unsafe { (*self.0.as_ptr()).state = state.to_byte() }
    }

    /// Free-list link stored in the first usable word.
    ///
    /// # Safety
    ///
    /// The chunk must be FREE and its first usable word mapped.
    #[must_use]
    pub unsafe fn next_link(self) -> usize {
        // SAFETY: user_ptr is 16-aligned and the word lies inside the chunk.
        unsafe { self.user_ptr().as_ptr().cast::<usize>().read() }
    }

    /// # Safety
    ///
    /// See [`ChunkPtr::next_link`].
    pub unsafe fn set_next_link(self, next: usize) {
        // SAFETY: user_ptr is 16-aligned and the word lies inside the chunk.
        unsafe { self.user_ptr().as_ptr().cast::<usize>().write(next) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Slot([u8; 64]);

    #[test]
    fn header_roundtrips_through_memory() {
        let mut slot = Slot([0; 64]);
        let addr = slot.0.as_mut_ptr() as usize;
        // SAFETY: slot is 64 aligned, writable bytes.
        unsafe {
            let chunk = ChunkPtr::from_addr(addr).unwrap();
            chunk.write(ChunkHeader::new(addr, 5, ChunkState::Allocated, 9));
            let header = chunk.read();
            assert!(header.canary_matches(addr));
            assert_eq!(header.class(), 5);
            assert_eq!(header.arena(), 9);
            assert_eq!(header.state(), Some(ChunkState::Allocated));

            chunk.set_state(ChunkState::Free);
            let header = chunk.read();
            assert_eq!(header.state(), Some(ChunkState::Free));
            assert!(header.canary_matches(addr), "state is not part of the canary");
            assert_eq!(chunk.user_ptr().as_ptr() as usize, addr + HEADER_SIZE);
        }
    }

    #[test]
    fn canary_depends_on_location_class_and_arena() {
        let base = ChunkHeader::new(0x1000, 3, ChunkState::Free, 1);
        assert!(base.canary_matches(0x1000));
        assert!(!base.canary_matches(0x1010));
        assert_ne!(
            ChunkHeader::new(0x1000, 4, ChunkState::Free, 1).canary,
            base.canary
        );
        assert_ne!(
            ChunkHeader::new(0x1000, 3, ChunkState::Free, 2).canary,
            base.canary
        );
    }

    #[test]
    fn zeroed_memory_is_not_a_header() {
        let zero = ChunkHeader {
            canary: 0,
            class: 0,
            state: 0,
            reserved: 0,
            arena: 0,
        };
        assert_eq!(zero.state(), None);
        assert!(!zero.canary_matches(0x2000));
    }

    #[test]
    fn next_link_uses_first_user_word() {
        let mut slot = Slot([0; 64]);
        let addr = slot.0.as_mut_ptr() as usize;
        // SAFETY: slot is 64 aligned, writable bytes.
        unsafe {
            let chunk = ChunkPtr::from_addr(addr).unwrap();
            chunk.set_next_link(0xDEAD_0000);
            assert_eq!(chunk.next_link(), 0xDEAD_0000);
            let from_user = ChunkPtr::from_user(addr + HEADER_SIZE).unwrap();
            assert_eq!(from_user, chunk);
        }
    }
}
