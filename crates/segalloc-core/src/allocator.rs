//! Allocator facade.
//!
//! Ties the size-class table, the free lists, the arena registry and the
//! backing store together. Per chunk the state machine is
//! `UNALLOCATED -> ALLOCATED -> FREE -> ALLOCATED -> ...`; releasing a FREE
//! chunk or an address that never was a chunk is misuse, and [`Allocator::release`]
//! terminates the process on misuse.
//!
//! A dedicated arena that is not kept as a spare is retired rather than
//! unmapped: its addresses stay reserved, so a second release of its chunk
//! is still a double free instead of a release of whatever the OS maps
//! there next.

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::arena::{ArenaId, ArenaKind, ArenaRegistry, Tombstone};
use crate::backing::{BackingStore, MmapBackingStore, Region};
use crate::config::AllocatorConfig;
use crate::error::{AllocError, BackingError, ConfigError, Misuse};
use crate::fatal::abort_on_misuse;
use crate::free_list::FreeLists;
use crate::header::{ALIGNMENT, ChunkHeader, ChunkPtr, ChunkState, HEADER_SIZE};
use crate::log::{
    AllocatorLogLevel, AllocatorLogRecord, CounterSnapshot, LifecycleEvent, LifecycleLog,
};
use crate::size_class::{ClassId, SizeClassTable};

/// Byte written over released chunks when poisoning is enabled.
pub const POISON_BYTE: u8 = 0xDF;

const LINK_SIZE: usize = std::mem::size_of::<usize>();

/// What [`Allocator::validate`] learned about a live chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// User pointer.
    pub ptr: usize,
    pub class: ClassId,
    /// Usable bytes (the class size).
    pub usable_size: usize,
    pub arena_id: ArenaId,
    pub arena_base: usize,
    pub arena_kind: ArenaKind,
}

/// Allocator counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Chunks currently ALLOCATED.
    pub live_chunks: usize,
    /// Class bytes of the live chunks.
    pub live_bytes: usize,
    /// High-water mark of `live_bytes`.
    pub peak_live_bytes: usize,
    /// Chunks on free lists.
    pub free_chunks: usize,
    /// Bytes mapped from the backing store.
    pub mapped_bytes: usize,
    /// Arenas currently registered.
    pub arenas: usize,
    /// Released dedicated arenas whose addresses are still reserved.
    pub retired_arenas: usize,
    /// Bytes of address space held by retired arenas.
    pub reserved_bytes: usize,
    /// Successful allocations.
    pub allocations: u64,
    /// Successful releases.
    pub releases: u64,
    /// Allocations served from a free list.
    pub reuse_hits: u64,
    /// Allocations served by carving fresh memory.
    pub fresh_chunks: u64,
    /// Slab tail chunks pushed to free lists instead of being wasted.
    pub salvaged_chunks: u64,
    pub arenas_mapped: u64,
    /// Regions handed back to the OS.
    pub arenas_released: u64,
    /// Regions the OS refused to unmap.
    pub unmap_failures: u64,
    /// Requests above the maximum single allocation.
    pub out_of_range: u64,
    /// Requests that failed because the backing store refused.
    pub exhausted: u64,
}

/// Result of a successful [`Allocator::verify_heap`] walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapReport {
    pub slab_arenas: usize,
    pub dedicated_arenas: usize,
    pub live_chunks: usize,
    pub live_bytes: usize,
    pub free_chunks: usize,
    pub free_bytes: usize,
    /// Mapped bytes never carved into chunks.
    pub uncarved_bytes: usize,
    pub mapped_bytes: usize,
    pub retired_arenas: usize,
    pub reserved_bytes: usize,
}

/// Segregated free-list allocator.
///
/// Every call is synchronous and takes `&mut self`; share an instance
/// between threads only behind a lock.
pub struct Allocator<B: BackingStore = MmapBackingStore> {
    config: AllocatorConfig,
    classes: SizeClassTable,
    free_lists: FreeLists,
    arenas: ArenaRegistry,
    backing: B,
    /// Base of the slab arena currently being carved.
    current_slab: Option<usize>,
    stats: AllocatorStats,
    log: LifecycleLog,
}

impl Allocator<MmapBackingStore> {
    /// Creates an allocator over anonymous `mmap`, honoring `config.backing_limit`.
    pub fn new(config: AllocatorConfig) -> Result<Self, ConfigError> {
        let backing = MmapBackingStore::with_limit(config.backing_limit);
        Self::with_backing(config, backing)
    }
}

impl Default for Allocator<MmapBackingStore> {
    /// Default configuration over unbounded `mmap`.
    fn default() -> Self {
        Self::from_parts(AllocatorConfig::default(), MmapBackingStore::new())
    }
}

impl<B: BackingStore> Allocator<B> {
    /// Creates an allocator over a caller-supplied backing store.
    ///
    /// `config.backing_limit` is not applied here; budgets belong to the store.
    pub fn with_backing(config: AllocatorConfig, backing: B) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(config, backing))
    }

    fn from_parts(config: AllocatorConfig, backing: B) -> Self {
        let classes = SizeClassTable::new(config.max_allocation);
        let free_lists = FreeLists::new(classes.len());
        let log = LifecycleLog::new(config.log_level, config.log_capacity);
        Self {
            config,
            classes,
            free_lists,
            arenas: ArenaRegistry::new(),
            backing,
            current_slab: None,
            stats: AllocatorStats::default(),
            log,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[must_use]
    pub fn size_classes(&self) -> &SizeClassTable {
        &self.classes
    }

    /// Reserves a chunk of at least `size` usable bytes, 16-byte aligned.
    ///
    /// `size == 0` yields a chunk of the smallest class.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let class = match self.classes.classify(size) {
            Ok(class) => class,
            Err(err) => {
                self.stats.out_of_range += 1;
                self.record(
                    LifecycleEvent::new(AllocatorLogLevel::Warn, "alloc", "out_of_range", "null")
                        .with_size(size),
                    || err.to_string(),
                );
                return Err(err);
            }
        };

        let (chunk, source) = match self.take_chunk(class) {
            Ok(found) => found,
            Err(err) => {
                self.stats.exhausted += 1;
                self.record(
                    LifecycleEvent::new(
                        AllocatorLogLevel::Warn,
                        "alloc",
                        "backing_exhausted",
                        "null",
                    )
                    .with_size(size)
                    .with_class(class),
                    || err.to_string(),
                );
                return Err(err);
            }
        };

        let usable = self.class_size(class);
        self.stats.allocations += 1;
        self.stats.live_chunks += 1;
        self.stats.live_bytes += usable;
        self.stats.peak_live_bytes = self.stats.peak_live_bytes.max(self.stats.live_bytes);

        let user = chunk.user_ptr();
        self.record(
            LifecycleEvent::new(AllocatorLogLevel::Trace, "alloc", "alloc", source)
                .with_ptr(user.as_ptr() as usize)
                .with_size(size)
                .with_class(class),
            String::new,
        );
        Ok(user)
    }

    /// Like [`Allocator::try_allocate`], returning null on failure.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        self.try_allocate(size).map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    /// Releases `ptr`, aborting the process on misuse. Null is a no-op.
    ///
    /// # Safety
    ///
    /// If `ptr` is a live chunk of this allocator, the caller must not use it
    /// after this call.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        if let Err(misuse) = unsafe { self.try_release(ptr) } {
            self.fatal("dealloc", misuse);
        }
    }

    /// Releases `ptr`, reporting misuse instead of aborting.
    ///
    /// On `Err` nothing was modified.
    ///
    /// # Safety
    ///
    /// See [`Allocator::release`].
    pub unsafe fn try_release(&mut self, ptr: *mut u8) -> Result<(), Misuse> {
        if ptr.is_null() {
            return Ok(());
        }
        let info = self.validate(ptr)?;
        // SAFETY: validate found our header in front of `ptr`.
        let Some(chunk) = (unsafe { ChunkPtr::from_user(info.ptr) }) else {
            return Err(Misuse::NotChunkStart { addr: info.ptr });
        };

        let retire = info.arena_kind == ArenaKind::Dedicated
            && self.free_lists.len(info.class) >= self.config.large_retain_per_class;
        if retire {
            self.retire_arena(info.arena_base, info.class);
        } else {
            if self.config.poison_freed {
                // SAFETY: the usable bytes are ours again.
                unsafe { ptr.write_bytes(POISON_BYTE, info.usable_size) };
            }
            // SAFETY: validated ALLOCATED chunk of `info.class`.
            unsafe { self.free_lists.recycle(info.class, chunk)? };
            if let Some(arena) = self.arenas.get_mut(info.arena_base) {
                arena.note_released();
            }
        }

        self.stats.releases += 1;
        self.stats.live_chunks -= 1;
        self.stats.live_bytes -= info.usable_size;
        self.record(
            LifecycleEvent::new(
                AllocatorLogLevel::Trace,
                "dealloc",
                "free",
                if retire { "retired" } else { "recycled" },
            )
            .with_ptr(info.ptr)
            .with_class(info.class),
            String::new,
        );
        Ok(())
    }

    /// Classifies `ptr` without touching allocator state.
    ///
    /// Checks run in order: arena membership (no memory is read for foreign
    /// pointers), chunk-start position, header integrity, then state. The
    /// chunk of a retired arena is FREE; its header is never read.
    pub fn validate(&self, ptr: *const u8) -> Result<ChunkInfo, Misuse> {
        let addr = ptr as usize;
        let Some(arena) = self.arenas.find(addr) else {
            return Err(self.retired_misuse(addr));
        };

        let not_start = Misuse::NotChunkStart { addr };
        if addr % ALIGNMENT != 0
            || addr < arena.base() + HEADER_SIZE
            || addr + LINK_SIZE > arena.carved_end()
        {
            return Err(not_start);
        }
        let header_addr = addr - HEADER_SIZE;
        if arena.kind() == ArenaKind::Dedicated && header_addr != arena.base() {
            return Err(not_start);
        }

        // SAFETY: `header_addr` is aligned and inside the carved part of a
        // mapped arena.
        let header = unsafe { ChunkPtr::from_addr(header_addr).ok_or(not_start)?.read() };
        let corrupt = Misuse::CorruptHeader { addr };
        if !header.canary_matches(header_addr) || header.arena() != arena.id() {
            return Err(corrupt);
        }
        let class = header.class();
        let usable_size = self.classes.class_size(class).ok_or(corrupt)?;
        if addr + usable_size > arena.carved_end() {
            return Err(corrupt);
        }

        match header.state() {
            Some(ChunkState::Allocated) => Ok(ChunkInfo {
                ptr: addr,
                class,
                usable_size,
                arena_id: arena.id(),
                arena_base: arena.base(),
                arena_kind: arena.kind(),
            }),
            Some(ChunkState::Free) => Err(Misuse::DoubleFree { addr, class }),
            None => Err(corrupt),
        }
    }

    fn retired_misuse(&self, addr: usize) -> Misuse {
        match self.arenas.find_retired(addr) {
            Some(tombstone) if addr == tombstone.base() + HEADER_SIZE => Misuse::DoubleFree {
                addr,
                class: tombstone.class(),
            },
            Some(_) => Misuse::NotChunkStart { addr },
            None => Misuse::ForeignPointer { addr },
        }
    }

    /// Usable bytes behind a live chunk pointer; `None` for anything else.
    #[must_use]
    pub fn usable_size(&self, ptr: *const u8) -> Option<usize> {
        self.validate(ptr).ok().map(|info| info.usable_size)
    }

    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            free_chunks: self.free_lists.total_len(),
            mapped_bytes: self.arenas.mapped_bytes(),
            arenas: self.arenas.len(),
            retired_arenas: self.arenas.retired_len(),
            reserved_bytes: self.arenas.reserved_bytes(),
            ..self.stats
        }
    }

    /// Walks every free list and every arena.
    ///
    /// Checks that a chunk is listed iff it is FREE, that every header
    /// validates, that chunks tile each arena's carved part exactly and that
    /// per-arena live counts match the walk.
    pub fn verify_heap(&mut self) -> Result<HeapReport, Misuse> {
        let result = self.walk_heap();
        match &result {
            Ok(report) => {
                let report = *report;
                self.record(
                    LifecycleEvent::new(
                        AllocatorLogLevel::Info,
                        "verify_heap",
                        "heap_verified",
                        "ok",
                    ),
                    || format!("{report:?}"),
                );
            }
            Err(misuse) => {
                let misuse = *misuse;
                self.record(
                    LifecycleEvent::new(
                        AllocatorLogLevel::Error,
                        "verify_heap",
                        misuse.event(),
                        "failed",
                    )
                    .with_ptr(misuse.addr()),
                    || misuse.to_string(),
                );
            }
        }
        result
    }

    /// Records that a configuration was rejected and defaults are in use.
    pub fn note_config_error(&mut self, err: &ConfigError) {
        self.record(
            LifecycleEvent::new(
                AllocatorLogLevel::Warn,
                "init",
                "config_rejected",
                "defaults",
            ),
            || err.to_string(),
        );
    }

    /// Snapshot of the lifecycle ring.
    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.log.records()
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    fn class_size(&self, class: ClassId) -> usize {
        self.classes.class_size(class).unwrap_or(0)
    }

    fn take_chunk(&mut self, class: ClassId) -> Result<(ChunkPtr, &'static str), AllocError> {
        let arenas = &self.arenas;
        // SAFETY: lists only hold chunks pushed by `recycle` on this allocator.
        let reused = unsafe {
            self.free_lists
                .try_reuse(class, |addr| chunk_in_carved(arenas, addr))
        };
        match reused {
            Ok(Some(chunk)) => {
                self.stats.reuse_hits += 1;
                self.note_allocated(chunk);
                return Ok((chunk, "reused"));
            }
            Ok(None) => {}
            Err(misuse) => self.fatal("alloc", misuse),
        }

        let (chunk, source) = if self.classes.is_small(class) {
            (self.carve_small(class)?, "carved")
        } else {
            (self.map_dedicated(class)?, "dedicated")
        };
        self.stats.fresh_chunks += 1;
        self.note_allocated(chunk);
        Ok((chunk, source))
    }

    fn note_allocated(&mut self, chunk: ChunkPtr) {
        if let Some(arena) = self.arenas.find_mut(chunk.addr()) {
            arena.note_allocated();
        }
    }

    fn carve_small(&mut self, class: ClassId) -> Result<ChunkPtr, AllocError> {
        let total = HEADER_SIZE + self.class_size(class);
        if let Some(base) = self.current_slab {
            if let Some(chunk) = self.carve_from(base, class, total) {
                return Ok(chunk);
            }
            self.salvage_tail(base);
        }

        let region = self.backing.acquire(self.config.arena_size.max(total))?;
        let mapped = region.size();
        let base = self.register(region, ArenaKind::Slab)?;
        self.current_slab = Some(base);
        self.stats.arenas_mapped += 1;
        self.record(
            LifecycleEvent::new(AllocatorLogLevel::Info, "alloc", "arena_mapped", "slab")
                .with_ptr(base)
                .with_size(mapped),
            || format!("slab arena of {mapped} bytes"),
        );
        self.carve_from(base, class, total)
            .ok_or_else(|| BackingError::SizeOverflow { requested: total }.into())
    }

    fn map_dedicated(&mut self, class: ClassId) -> Result<ChunkPtr, AllocError> {
        let usable = self.class_size(class);
        let total = usable
            .checked_add(HEADER_SIZE)
            .ok_or(BackingError::SizeOverflow { requested: usable })?;
        let region = self.backing.acquire(total)?;
        let mapped = region.size();
        let base = self.register(region, ArenaKind::Dedicated)?;
        self.stats.arenas_mapped += 1;
        self.record(
            LifecycleEvent::new(AllocatorLogLevel::Info, "alloc", "arena_mapped", "dedicated")
                .with_ptr(base)
                .with_size(mapped)
                .with_class(class),
            || format!("dedicated arena of {mapped} bytes"),
        );
        self.carve_from(base, class, total)
            .ok_or_else(|| BackingError::SizeOverflow { requested: total }.into())
    }

    fn register(&mut self, region: Region, kind: ArenaKind) -> Result<usize, AllocError> {
        match self.arenas.insert(region, kind) {
            Ok(base) => Ok(base),
            Err(region) => {
                self.unmap_region(region, "alloc");
                Err(AllocError::ArenaIdsExhausted)
            }
        }
    }

    /// Carves an ALLOCATED chunk of `class` at the arena's high-water mark.
    fn carve_from(&mut self, base: usize, class: ClassId, total: usize) -> Option<ChunkPtr> {
        let arena = self.arenas.get_mut(base)?;
        let id = arena.id();
        let addr = arena.carve(total)?;
        // SAFETY: `addr..addr + total` was just carved out of a live mapping.
        unsafe {
            let chunk = ChunkPtr::from_addr(addr)?;
            chunk.write(ChunkHeader::new(addr, class, ChunkState::Allocated, id));
            Some(chunk)
        }
    }

    /// Cuts the uncarved tail of a full slab into FREE chunks.
    fn salvage_tail(&mut self, base: usize) {
        let mut salvaged = 0u64;
        let mut bytes = 0usize;
        loop {
            let Some(room) = self.arenas.get(base).map(|arena| arena.remaining()) else {
                break;
            };
            let Some(class) = room
                .checked_sub(HEADER_SIZE)
                .and_then(|payload| self.classes.largest_small_fitting(payload))
            else {
                break;
            };
            let total = HEADER_SIZE + self.class_size(class);
            let Some(chunk) = self.carve_from(base, class, total) else {
                break;
            };
            // SAFETY: freshly carved ALLOCATED chunk of `class`.
            if let Err(misuse) = unsafe { self.free_lists.recycle(class, chunk) } {
                self.fatal("alloc", misuse);
            }
            salvaged += 1;
            bytes += total;
        }
        if salvaged > 0 {
            self.stats.salvaged_chunks += salvaged;
            self.record(
                LifecycleEvent::new(AllocatorLogLevel::Debug, "alloc", "tail_salvaged", "ok")
                    .with_ptr(base)
                    .with_size(bytes),
                || format!("{salvaged} chunks"),
            );
        }
    }

    /// Drops the pages of a dedicated arena whose chunk was just released.
    ///
    /// The addresses stay reserved as a tombstone; evicted tombstones and
    /// arenas the OS refuses to retire are unmapped.
    fn retire_arena(&mut self, base: usize, class: ClassId) {
        let Some(arena) = self.arenas.remove(base) else {
            return;
        };
        let id = arena.id();
        let size = arena.size();
        let mut region = arena.into_region();

        let capacity = self.config.large_quarantine;
        if capacity > 0 {
            // SAFETY: the arena's only chunk was released by the caller.
            match unsafe { self.backing.retire(&mut region) } {
                Ok(()) => {
                    let evicted = self
                        .arenas
                        .entomb(Tombstone::new(id, class, region), capacity);
                    self.record(
                        LifecycleEvent::new(
                            AllocatorLogLevel::Info,
                            "dealloc",
                            "arena_retired",
                            "reserved",
                        )
                        .with_ptr(base)
                        .with_size(size)
                        .with_class(class),
                        String::new,
                    );
                    for old in evicted {
                        self.unmap_region(old, "dealloc");
                    }
                    return;
                }
                Err(err) => self.record(
                    LifecycleEvent::new(
                        AllocatorLogLevel::Warn,
                        "dealloc",
                        "reserve_failed",
                        "unmap",
                    )
                    .with_ptr(base)
                    .with_size(size),
                    || err.to_string(),
                ),
            }
        }
        self.unmap_region(region, "dealloc");
    }

    fn unmap_region(&mut self, region: Region, symbol: &'static str) {
        let base = region.addr();
        let size = region.size();
        // SAFETY: no chunk of the region is live or listed.
        match unsafe { self.backing.release(region) } {
            Ok(()) => {
                self.stats.arenas_released += 1;
                self.record(
                    LifecycleEvent::new(AllocatorLogLevel::Info, symbol, "arena_released", "ok")
                        .with_ptr(base)
                        .with_size(size),
                    String::new,
                );
            }
            Err(err) => {
                self.stats.unmap_failures += 1;
                self.record(
                    LifecycleEvent::new(AllocatorLogLevel::Error, symbol, "unmap_failed", "leaked")
                        .with_ptr(base)
                        .with_size(size),
                    || err.to_string(),
                );
            }
        }
    }

    fn walk_heap(&self) -> Result<HeapReport, Misuse> {
        let arenas = &self.arenas;
        let owns = |addr| chunk_in_carved(arenas, addr);

        let mut listed: HashMap<usize, ClassId> =
            HashMap::with_capacity(self.free_lists.total_len());
        for class in 0..self.free_lists.classes() {
            // SAFETY: lists only hold chunks pushed by `recycle`; links are
            // vetted by `owns` before being followed.
            for chunk in unsafe { self.free_lists.iter(class, owns) } {
                listed.insert(chunk?.addr(), class);
            }
        }

        let mut report = HeapReport {
            mapped_bytes: self.arenas.mapped_bytes(),
            retired_arenas: self.arenas.retired_len(),
            reserved_bytes: self.arenas.reserved_bytes(),
            ..HeapReport::default()
        };
        for arena in self.arenas.iter() {
            let end = arena.carved_end();
            let mut cursor = arena.base();
            let mut live = 0;
            while cursor < end {
                let corrupt = Misuse::CorruptHeader {
                    addr: cursor + HEADER_SIZE,
                };
                // SAFETY: `cursor` is a chunk boundary inside the carved part.
                let header = unsafe { ChunkPtr::from_addr(cursor).ok_or(corrupt)?.read() };
                if !header.canary_matches(cursor) || header.arena() != arena.id() {
                    return Err(corrupt);
                }
                let class = header.class();
                let size = self.classes.class_size(class).ok_or(corrupt)?;
                let next = cursor + HEADER_SIZE + size;
                if next > end {
                    return Err(corrupt);
                }
                match header.state() {
                    Some(ChunkState::Allocated) => {
                        if listed.contains_key(&cursor) {
                            return Err(Misuse::CorruptFreeList {
                                addr: cursor,
                                class,
                            });
                        }
                        live += 1;
                        report.live_bytes += size;
                    }
                    Some(ChunkState::Free) => {
                        if listed.remove(&cursor).is_none() {
                            return Err(Misuse::CorruptFreeList {
                                addr: cursor,
                                class,
                            });
                        }
                        report.free_chunks += 1;
                        report.free_bytes += size;
                    }
                    None => return Err(corrupt),
                }
                cursor = next;
            }
            if live != arena.live_chunks() {
                return Err(Misuse::InconsistentArena {
                    addr: arena.base(),
                    recorded: arena.live_chunks(),
                    walked: live,
                });
            }
            report.live_chunks += live;
            report.uncarved_bytes += arena.remaining();
            match arena.kind() {
                ArenaKind::Slab => report.slab_arenas += 1,
                ArenaKind::Dedicated => report.dedicated_arenas += 1,
            }
        }

        // Listed chunks the walk never reached are not on any chunk boundary.
        if let Some((&addr, &class)) = listed.iter().next() {
            return Err(Misuse::CorruptFreeList { addr, class });
        }
        Ok(report)
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            live_chunks: self.stats.live_chunks,
            live_bytes: self.stats.live_bytes,
            free_chunks: self.free_lists.total_len(),
            mapped_bytes: self.arenas.mapped_bytes(),
        }
    }

    fn record(&mut self, event: LifecycleEvent, details: impl FnOnce() -> String) {
        if !self.log.enabled(event.level) {
            return;
        }
        let counters = self.snapshot();
        self.log.record(event, counters, details);
    }

    fn fatal(&mut self, symbol: &'static str, misuse: Misuse) -> ! {
        self.record(
            LifecycleEvent::new(AllocatorLogLevel::Fatal, symbol, misuse.event(), "abort")
                .with_ptr(misuse.addr()),
            || misuse.to_string(),
        );
        abort_on_misuse(symbol, misuse)
    }
}

impl<B: BackingStore> Drop for Allocator<B> {
    fn drop(&mut self) {
        self.current_slab = None;
        for region in self.arenas.drain() {
            // SAFETY: dropping the allocator ends the life of every chunk.
            let released = unsafe { self.backing.release(region) };
            debug_assert!(released.is_ok(), "{released:?}");
        }
    }
}

/// True when `addr` can be a chunk header: aligned, inside a registered
/// arena, with header and link word below the high-water mark.
fn chunk_in_carved(arenas: &ArenaRegistry, addr: usize) -> bool {
    addr % ALIGNMENT == 0
        && arenas
            .find(addr)
            .is_some_and(|arena| addr + HEADER_SIZE + LINK_SIZE <= arena.carved_end())
}
