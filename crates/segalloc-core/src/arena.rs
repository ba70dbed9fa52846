//! Arenas and the arena registry.
//!
//! An arena is one region from the backing store. Slab arenas are carved
//! front to back into chunks of mixed small classes; dedicated arenas hold
//! exactly one large chunk. The registry is the side table consulted before
//! any header is read: an address outside every registered arena is never
//! dereferenced.
//!
//! Released dedicated arenas stay behind as tombstones: their pages are
//! gone but the addresses remain reserved, so a stale pointer into one is
//! still recognized. Tombstones are kept first in, first out up to a
//! caller-chosen capacity.

use std::collections::{BTreeMap, VecDeque};

use crate::backing::Region;
use crate::size_class::ClassId;

/// Arena identifier. Monotonic per allocator instance, never reused; once
/// `ArenaId::MAX` has been handed out no further arena can be registered.
pub type ArenaId = u32;

/// How an arena is carved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaKind {
    /// Shared by many small chunks, carved by bumping the high-water mark.
    Slab,
    /// Holds a single large chunk at its base.
    Dedicated,
}

/// One region owned by the allocator.
#[derive(Debug)]
pub struct Arena {
    id: ArenaId,
    region: Region,
    kind: ArenaKind,
    /// Bytes carved so far, measured from the base.
    high_water: usize,
    /// Chunks of this arena currently ALLOCATED.
    live_chunks: usize,
}

impl Arena {
    fn new(id: ArenaId, region: Region, kind: ArenaKind) -> Self {
        Self {
            id,
            region,
            kind,
            high_water: 0,
            live_chunks: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> ArenaId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> ArenaKind {
        self.kind
    }

    #[must_use]
    pub fn base(&self) -> usize {
        self.region.addr()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    #[must_use]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// End of the carved part (exclusive).
    #[must_use]
    pub fn carved_end(&self) -> usize {
        self.base() + self.high_water
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.size() - self.high_water
    }

    #[must_use]
    pub fn live_chunks(&self) -> usize {
        self.live_chunks
    }

    /// True when `addr` lies inside the mapped region.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr - self.base() < self.size()
    }

    /// Reserves `total` bytes at the high-water mark.
    ///
    /// Returns the address of the reserved bytes, or `None` if they do not fit.
    pub fn carve(&mut self, total: usize) -> Option<usize> {
        if total > self.remaining() {
            return None;
        }
        let addr = self.carved_end();
        self.high_water += total;
        Some(addr)
    }

    pub(crate) fn note_allocated(&mut self) {
        self.live_chunks += 1;
    }

    pub(crate) fn note_released(&mut self) {
        self.live_chunks = self.live_chunks.saturating_sub(1);
    }

    pub(crate) fn into_region(self) -> Region {
        self.region
    }
}

/// A retired dedicated arena. Its addresses are reserved but unreadable.
#[derive(Debug)]
pub struct Tombstone {
    id: ArenaId,
    class: ClassId,
    region: Region,
}

impl Tombstone {
    #[must_use]
    pub fn new(id: ArenaId, class: ClassId, region: Region) -> Self {
        Self { id, class, region }
    }

    #[must_use]
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Class of the chunk the arena held.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    #[must_use]
    pub fn base(&self) -> usize {
        self.region.addr()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr - self.base() < self.size()
    }
}

/// Every arena of one allocator, keyed by base address.
#[derive(Debug)]
pub struct ArenaRegistry {
    by_base: BTreeMap<usize, Arena>,
    retired: BTreeMap<usize, Tombstone>,
    /// Tombstone bases, oldest first.
    retired_order: VecDeque<usize>,
    /// `None` once every id has been handed out.
    next_id: Option<ArenaId>,
    mapped_bytes: usize,
    reserved_bytes: usize,
}

impl Default for ArenaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_base: BTreeMap::new(),
            retired: BTreeMap::new(),
            retired_order: VecDeque::new(),
            next_id: Some(1),
            mapped_bytes: 0,
            reserved_bytes: 0,
        }
    }

    /// Registers a fresh region and returns its base address.
    ///
    /// Hands the region back when arena ids are exhausted.
    pub fn insert(&mut self, region: Region, kind: ArenaKind) -> Result<usize, Region> {
        let Some(id) = self.next_id else {
            return Err(region);
        };
        self.next_id = id.checked_add(1);
        let base = region.addr();
        self.mapped_bytes += region.size();
        self.by_base.insert(base, Arena::new(id, region, kind));
        Ok(base)
    }

    /// Keeps `tombstone`, evicting the oldest ones beyond `capacity`.
    ///
    /// Returns the regions of evicted tombstones, which the caller unmaps.
    pub fn entomb(&mut self, tombstone: Tombstone, capacity: usize) -> Vec<Region> {
        let base = tombstone.base();
        self.reserved_bytes += tombstone.size();
        self.retired.insert(base, tombstone);
        self.retired_order.push_back(base);

        let mut evicted = Vec::new();
        while self.retired_order.len() > capacity {
            let Some(oldest) = self.retired_order.pop_front() else {
                break;
            };
            if let Some(tombstone) = self.retired.remove(&oldest) {
                self.reserved_bytes -= tombstone.size();
                evicted.push(tombstone.region);
            }
        }
        evicted
    }

    /// Tombstone whose reserved range contains `addr`.
    #[must_use]
    pub fn find_retired(&self, addr: usize) -> Option<&Tombstone> {
        self.retired
            .range(..=addr)
            .next_back()
            .map(|(_, tombstone)| tombstone)
            .filter(|tombstone| tombstone.contains(addr))
    }

    /// Unregisters the arena based at `base`.
    pub fn remove(&mut self, base: usize) -> Option<Arena> {
        let arena = self.by_base.remove(&base)?;
        self.mapped_bytes -= arena.size();
        Some(arena)
    }

    /// Arena whose region contains `addr`.
    #[must_use]
    pub fn find(&self, addr: usize) -> Option<&Arena> {
        self.by_base
            .range(..=addr)
            .next_back()
            .map(|(_, arena)| arena)
            .filter(|arena| arena.contains(addr))
    }

    pub fn find_mut(&mut self, addr: usize) -> Option<&mut Arena> {
        self.by_base
            .range_mut(..=addr)
            .next_back()
            .map(|(_, arena)| arena)
            .filter(|arena| arena.contains(addr))
    }

    #[must_use]
    pub fn get(&self, base: usize) -> Option<&Arena> {
        self.by_base.get(&base)
    }

    pub fn get_mut(&mut self, base: usize) -> Option<&mut Arena> {
        self.by_base.get_mut(&base)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arena> {
        self.by_base.values()
    }

    /// Removes every arena and tombstone, yielding their regions for release.
    pub fn drain(&mut self) -> Vec<Region> {
        self.mapped_bytes = 0;
        self.reserved_bytes = 0;
        self.retired_order.clear();
        let live = std::mem::take(&mut self.by_base)
            .into_values()
            .map(Arena::into_region);
        let retired = std::mem::take(&mut self.retired)
            .into_values()
            .map(|tombstone| tombstone.region);
        live.chain(retired).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }

    #[must_use]
    pub fn mapped_bytes(&self) -> usize {
        self.mapped_bytes
    }

    /// Number of tombstones.
    #[must_use]
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }
}
