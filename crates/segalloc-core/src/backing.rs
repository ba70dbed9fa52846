//! Backing-store adapter.
//!
//! Wraps the OS mapping primitive into whole-region acquisition and
//! release. Every request is rounded up to the store's granularity. A
//! region can also be retired: its pages go back to the OS while its
//! addresses stay reserved, so no later mapping lands on them.

use std::ptr::NonNull;

use crate::error::BackingError;
use crate::size_class::align_up;

/// Page size assumed when `sysconf` cannot tell.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// A region handed out by a backing store.
#[derive(Debug, PartialEq, Eq)]
pub struct Region {
    base: NonNull<u8>,
    size: usize,
    retired: bool,
}

// SAFETY: a Region is the sole handle to an exclusively owned mapping.
unsafe impl Send for Region {}

impl Region {
    /// # Safety
    ///
    /// `base` must address `size` readable and writable bytes that nothing
    /// else owns.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, size: usize) -> Self {
        Self {
            base,
            size,
            retired: false,
        }
    }

    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// True once the region's pages were dropped by [`BackingStore::retire`].
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

/// Source of fresh memory for arenas.
pub trait BackingStore {
    /// Allocation granularity in bytes (a power of two).
    fn granularity(&self) -> usize;

    /// Maps at least `size` bytes of zeroed, writable memory.
    fn acquire(&mut self, size: usize) -> Result<Region, BackingError>;

    /// Returns a region to the OS.
    ///
    /// # Safety
    ///
    /// `region` must come from `acquire` on this store and no pointer into
    /// it may be used afterwards.
    unsafe fn release(&mut self, region: Region) -> Result<(), BackingError>;

    /// Drops the pages behind `region` but keeps its addresses reserved and
    /// inaccessible. The region must still be passed to `release` later.
    ///
    /// # Safety
    ///
    /// Same as [`BackingStore::release`]: nothing may read or write the
    /// region afterwards.
    unsafe fn retire(&mut self, region: &mut Region) -> Result<(), BackingError>;

    /// Bytes currently mapped through this store, retired regions excluded.
    fn mapped_bytes(&self) -> usize;

    /// Bytes held by retired regions.
    fn reserved_bytes(&self) -> usize;
}

/// Anonymous private `mmap` backing store with an optional byte budget.
#[derive(Debug)]
pub struct MmapBackingStore {
    page_size: usize,
    limit: Option<usize>,
    mapped: usize,
    reserved: usize,
}

impl MmapBackingStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Creates a store that refuses to map more than `limit` bytes in total.
    #[must_use]
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            page_size: system_page_size(),
            limit,
            mapped: 0,
            reserved: 0,
        }
    }

    /// Configured budget, if any.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    fn round(&self, size: usize) -> Result<usize, BackingError> {
        align_up(size.max(1), self.page_size).ok_or(BackingError::SizeOverflow { requested: size })
    }
}

impl Default for MmapBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for MmapBackingStore {
    fn granularity(&self) -> usize {
        self.page_size
    }

    fn acquire(&mut self, size: usize) -> Result<Region, BackingError> {
        let rounded = self.round(size)?;
        if let Some(limit) = self.limit {
            let within = self
                .mapped
                .checked_add(rounded)
                .is_some_and(|total| total <= limit);
            if !within {
                return Err(BackingError::LimitExceeded {
                    requested: rounded,
                    mapped: self.mapped,
                    limit,
                });
            }
        }

        // SAFETY: anonymous private mapping with no fixed address; the kernel
        // chooses placement and the result is checked against MAP_FAILED.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                rounded,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(BackingError::MapFailed {
                size: rounded,
                errno: last_errno(),
            });
        }
        let Some(base) = NonNull::new(raw.cast::<u8>()) else {
            return Err(BackingError::MapFailed {
                size: rounded,
                errno: 0,
            });
        };

        self.mapped += rounded;
        // SAFETY: the mapping is fresh, writable, and exclusively ours.
        Ok(unsafe { Region::from_raw_parts(base, rounded) })
    }

    unsafe fn release(&mut self, region: Region) -> Result<(), BackingError> {
        // SAFETY: caller guarantees the region came from `acquire` here and is
        // no longer referenced.
        let rc = unsafe { libc::munmap(region.base.as_ptr().cast(), region.size) };
        if rc != 0 {
            return Err(BackingError::UnmapFailed {
                addr: region.addr(),
                size: region.size,
                errno: last_errno(),
            });
        }
        if region.retired {
            self.reserved = self.reserved.saturating_sub(region.size);
        } else {
            self.mapped = self.mapped.saturating_sub(region.size);
        }
        Ok(())
    }

    unsafe fn retire(&mut self, region: &mut Region) -> Result<(), BackingError> {
        if region.retired {
            return Ok(());
        }
        // SAFETY: MAP_FIXED replaces only the caller's own region with an
        // inaccessible reservation; the result is checked against MAP_FAILED.
        let raw = unsafe {
            libc::mmap(
                region.base.as_ptr().cast(),
                region.size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED || raw.cast::<u8>() != region.base.as_ptr() {
            return Err(BackingError::ReserveFailed {
                addr: region.addr(),
                size: region.size,
                errno: last_errno(),
            });
        }
        region.retired = true;
        self.mapped = self.mapped.saturating_sub(region.size);
        self.reserved += region.size;
        Ok(())
    }

    fn mapped_bytes(&self) -> usize {
        self.mapped
    }

    fn reserved_bytes(&self) -> usize {
        self.reserved
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn system_page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    match usize::try_from(raw) {
        Ok(size) if size.is_power_of_two() => size,
        _ => FALLBACK_PAGE_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_rounds_to_page_and_is_writable() {
        let mut store = MmapBackingStore::new();
        let page = store.granularity();
        assert!(page.is_power_of_two());

        let region = store.acquire(10).unwrap();
        assert_eq!(region.size(), page);
        assert_eq!(region.addr() % page, 0);
        assert_eq!(store.mapped_bytes(), page);

        // SAFETY: the region is `page` writable bytes.
        unsafe {
            let p = region.base().as_ptr();
            assert_eq!(*p, 0, "anonymous mappings are zeroed");
            p.write_bytes(0xAB, page);
            assert_eq!(*p.add(page - 1), 0xAB);
            store.release(region).unwrap();
        }
        assert_eq!(store.mapped_bytes(), 0);
    }

    #[test]
    fn retired_region_keeps_its_addresses() {
        let mut store = MmapBackingStore::new();
        let page = store.granularity();
        let mut region = store.acquire(4 * page).unwrap();
        let base = region.addr();

        // SAFETY: nothing touches the region after it is retired.
        unsafe { store.retire(&mut region).unwrap() };
        assert!(region.is_retired());
        assert_eq!(store.mapped_bytes(), 0);
        assert_eq!(store.reserved_bytes(), 4 * page);

        // The reservation is still in place, so fresh mappings land elsewhere.
        let fresh: Vec<Region> = (0..8).map(|_| store.acquire(4 * page).unwrap()).collect();
        let end = base + 4 * page;
        assert!(
            fresh
                .iter()
                .all(|r| r.addr() + r.size() <= base || r.addr() >= end)
        );

        // SAFETY: every region came from this store and is unused.
        unsafe {
            for r in fresh {
                store.release(r).unwrap();
            }
            store.release(region).unwrap();
        }
        assert_eq!(store.mapped_bytes(), 0);
        assert_eq!(store.reserved_bytes(), 0);
    }

    #[test]
    fn failed_unmap_is_reported() {
        let mut store = MmapBackingStore::new();
        let page = store.granularity();
        // Misaligned base: munmap rejects it with EINVAL.
        let bogus = NonNull::new((page + 1) as *mut u8).unwrap();
        // SAFETY: the region is never dereferenced, only handed to munmap.
        let err = unsafe { store.release(Region::from_raw_parts(bogus, page)) }.unwrap_err();
        assert!(matches!(
            err,
            BackingError::UnmapFailed {
                errno: libc::EINVAL,
                ..
            }
        ));
    }

    #[test]
    fn limit_refuses_without_mapping() {
        let mut store = MmapBackingStore::with_limit(Some(64 * 1024));
        let first = store.acquire(60 * 1024).unwrap();
        let err = store.acquire(16 * 1024).unwrap_err();
        assert!(matches!(err, BackingError::LimitExceeded { .. }));
        assert_eq!(store.mapped_bytes(), first.size());
        // SAFETY: region came from this store.
        unsafe { store.release(first).unwrap() };
        assert!(store.acquire(16 * 1024).is_ok());
    }

    #[test]
    fn absurd_request_is_a_typed_failure() {
        let mut store = MmapBackingStore::new();
        assert!(matches!(
            store.acquire(usize::MAX),
            Err(BackingError::SizeOverflow { .. })
        ));
        let huge = store.acquire(usize::MAX / 2);
        assert!(matches!(huge, Err(BackingError::MapFailed { .. })));
    }
}
