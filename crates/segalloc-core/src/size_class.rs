//! Size class bins.
//!
//! Small classes run from 16 bytes to 32KB and are carved out of shared
//! slab arenas. Above 32KB the table continues geometrically with four
//! steps per doubling up to the configured maximum single allocation;
//! those classes each get a dedicated arena. The table is built once and
//! never changes afterwards.

use crate::error::AllocError;

/// Index into the size class table.
pub type ClassId = usize;

/// Minimum allocation size (bytes).
pub const MIN_SIZE: usize = 16;

/// Maximum size for small allocations (bytes). Above this, use dedicated arenas.
pub const MAX_SMALL_SIZE: usize = 32 * 1024; // 32KB

/// Number of small size class bins.
pub const NUM_SMALL_CLASSES: usize = 32;

/// Large classes per power of two.
pub const LARGE_STEPS_PER_DOUBLING: usize = 4;

/// Bins 0-7: 16-byte increments (16, 32, 48, 64, 80, 96, 112, 128)
/// Bins 8-15: 32-byte increments (160, 192, 224, 256, 288, 320, 352, 384)
/// Bins 16-23: wider steps up to 1536
/// Bins 24-31: 2048 up to 32KB
const SMALL_TABLE: [usize; NUM_SMALL_CLASSES] = [
    16, 32, 48, 64, 80, 96, 112, 128, // 16-byte steps
    160, 192, 224, 256, 288, 320, 352, 384, // 32-byte steps
    448, 512, 640, 768, 896, 1024, 1280, 1536, // wider steps
    2048, 2560, 3072, 4096, 8192, 16384, 24576, 32768, // large small classes
];

/// Rounds `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[must_use]
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Computes the small bin index for a given allocation size.
///
/// Sizes above `MAX_SMALL_SIZE` return `NUM_SMALL_CLASSES` to signal the
/// large path.
#[must_use]
pub fn bin_index(size: usize) -> usize {
    let size = size.max(MIN_SIZE);
    if size > MAX_SMALL_SIZE {
        return NUM_SMALL_CLASSES;
    }
    SMALL_TABLE.partition_point(|&class_size| class_size < size)
}

/// Returns the allocation size for a small bin index, or 0 when out of range.
#[must_use]
pub fn bin_size(index: usize) -> usize {
    SMALL_TABLE.get(index).copied().unwrap_or(0)
}

/// The full class table for one allocator instance.
#[derive(Debug, Clone)]
pub struct SizeClassTable {
    sizes: Vec<usize>,
    max_allocation: usize,
}

impl SizeClassTable {
    /// Builds the table covering every request in `0..=max_allocation`.
    ///
    /// The last class is `max_allocation` rounded up to 16 bytes.
    #[must_use]
    pub fn new(max_allocation: usize) -> Self {
        let max_allocation = max_allocation.max(MIN_SIZE).min(isize::MAX as usize / 2);
        let cap = align_up(max_allocation, MIN_SIZE).unwrap_or(max_allocation);

        let mut sizes: Vec<usize> = SMALL_TABLE.iter().copied().take_while(|&s| s < cap).collect();

        if cap > MAX_SMALL_SIZE {
            let mut base = MAX_SMALL_SIZE;
            'doubling: loop {
                let step = base / LARGE_STEPS_PER_DOUBLING;
                for i in 1..=LARGE_STEPS_PER_DOUBLING {
                    let size = base + step * i;
                    if size >= cap {
                        break 'doubling;
                    }
                    sizes.push(size);
                }
                base *= 2;
            }
        }
        sizes.push(cap);

        Self {
            sizes,
            max_allocation,
        }
    }

    /// Maps a request to its class. `0` maps to the smallest class.
    pub fn classify(&self, requested: usize) -> Result<ClassId, AllocError> {
        if requested > self.max_allocation {
            return Err(AllocError::OutOfRange {
                requested,
                max: self.max_allocation,
            });
        }
        let size = requested.max(1);
        Ok(self.sizes.partition_point(|&class_size| class_size < size))
    }

    /// Usable bytes of a class, or `None` for an unknown class.
    #[must_use]
    pub fn class_size(&self, class: ClassId) -> Option<usize> {
        self.sizes.get(class).copied()
    }

    /// True when chunks of this class are carved from shared slab arenas.
    #[must_use]
    pub fn is_small(&self, class: ClassId) -> bool {
        self.class_size(class).is_some_and(|size| size <= MAX_SMALL_SIZE)
    }

    /// Largest request this table accepts.
    #[must_use]
    pub fn max_allocation(&self) -> usize {
        self.max_allocation
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Largest small class whose chunk fits in `room` bytes of payload.
    #[must_use]
    pub fn largest_small_fitting(&self, room: usize) -> Option<ClassId> {
        let fitting = self
            .sizes
            .iter()
            .take_while(|&&s| s <= MAX_SMALL_SIZE)
            .take_while(|&&s| s <= room)
            .count();
        fitting.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn test_bin_index_min() {
        assert_eq!(bin_index(0), 0);
        assert_eq!(bin_index(1), 0);
        assert_eq!(bin_index(16), 0);
    }

    #[test]
    fn test_bin_index_round_up() {
        // 17 bytes should round up to 32-byte class (index 1)
        assert_eq!(bin_index(17), 1);
        // 65 bytes should round up to 80-byte class (index 4)
        assert_eq!(bin_index(65), 4);
        assert_eq!(bin_index(200), 10);
    }

    #[test]
    fn test_bin_index_large() {
        assert_eq!(bin_index(MAX_SMALL_SIZE), NUM_SMALL_CLASSES - 1);
        assert_eq!(bin_index(MAX_SMALL_SIZE + 1), NUM_SMALL_CLASSES);
    }

    #[test]
    fn test_bin_size_out_of_range() {
        assert_eq!(bin_size(NUM_SMALL_CLASSES), 0);
        assert_eq!(bin_size(0), MIN_SIZE);
    }

    #[test]
    fn table_is_strictly_increasing_and_aligned() {
        let table = SizeClassTable::new(128 * MIB);
        for i in 0..table.len() {
            let size = table.class_size(i).unwrap();
            assert_eq!(size % MIN_SIZE, 0, "class {i} ({size}) not 16-aligned");
            if i > 0 {
                assert!(size > table.class_size(i - 1).unwrap());
            }
        }
        assert_eq!(table.class_size(table.len() - 1), Some(128 * MIB));
    }

    #[test]
    fn small_part_matches_bin_table() {
        let table = SizeClassTable::new(128 * MIB);
        for i in 0..NUM_SMALL_CLASSES {
            assert_eq!(table.class_size(i), Some(bin_size(i)));
            assert!(table.is_small(i));
        }
        assert!(!table.is_small(NUM_SMALL_CLASSES));
    }

    #[test]
    fn large_classes_step_by_quarters() {
        let table = SizeClassTable::new(128 * MIB);
        let first_large: Vec<usize> = (NUM_SMALL_CLASSES..NUM_SMALL_CLASSES + 5)
            .map(|i| table.class_size(i).unwrap())
            .collect();
        assert_eq!(first_large, vec![40960, 49152, 57344, 65536, 81920]);
    }

    #[test]
    fn classify_rounds_up_to_smallest_fitting_class() {
        let table = SizeClassTable::new(128 * MIB);
        for request in [0, 1, 15, 16, 17, 200, 4097, 32768, 32769, 8 * MIB, 128 * MIB] {
            let class = table.classify(request).unwrap();
            let size = table.class_size(class).unwrap();
            assert!(size >= request, "class {class} too small for {request}");
            if class > 0 {
                assert!(table.class_size(class - 1).unwrap() < request.max(1));
            }
        }
    }

    #[test]
    fn classify_zero_is_smallest_class() {
        let table = SizeClassTable::new(128 * MIB);
        assert_eq!(table.classify(0), Ok(0));
    }

    #[test]
    fn classify_eight_mib_exact() {
        let table = SizeClassTable::new(128 * MIB);
        let class = table.classify(8 * MIB).unwrap();
        assert_eq!(table.class_size(class), Some(8 * MIB));
    }

    #[test]
    fn classify_rejects_beyond_maximum() {
        let table = SizeClassTable::new(128 * MIB);
        assert_eq!(
            table.classify(300 * MIB),
            Err(AllocError::OutOfRange {
                requested: 300 * MIB,
                max: 128 * MIB
            })
        );
        assert!(table.classify(usize::MAX).is_err());
    }

    #[test]
    fn unaligned_maximum_rounds_last_class() {
        let table = SizeClassTable::new(100_001);
        assert_eq!(table.max_allocation(), 100_001);
        let last = table.classify(100_001).unwrap();
        assert_eq!(last, table.len() - 1);
        assert_eq!(table.class_size(last), Some(100_016));
    }

    #[test]
    fn largest_small_fitting_picks_biggest_class() {
        let table = SizeClassTable::new(128 * MIB);
        assert_eq!(table.largest_small_fitting(15), None);
        assert_eq!(table.largest_small_fitting(16), Some(0));
        assert_eq!(table.largest_small_fitting(100), Some(5));
        assert_eq!(
            table.largest_small_fitting(10 * MIB),
            Some(NUM_SMALL_CLASSES - 1)
        );
    }
}
