//! Per-class free lists.
//!
//! Each class has an intrusive LIFO stack threaded through the first usable
//! word of its FREE chunks. A chunk is on a list iff its header says FREE;
//! push and pop keep the two in step and refuse to break that.

use crate::error::Misuse;
use crate::header::{ChunkPtr, ChunkState, ALIGNMENT};
use crate::size_class::ClassId;

/// End-of-list marker stored in the link word.
const NIL: usize = 0;

/// All free lists of one allocator.
#[derive(Debug, Clone)]
pub struct FreeLists {
    heads: Vec<usize>,
    lens: Vec<usize>,
}

impl FreeLists {
    /// Creates `classes` empty lists.
    #[must_use]
    pub fn new(classes: usize) -> Self {
        Self {
            heads: vec![NIL; classes],
            lens: vec![0; classes],
        }
    }

    /// Pushes `chunk` onto the list of `class` and marks it FREE.
    ///
    /// # Safety
    ///
    /// `chunk` must be a validated chunk of `class` owned by the allocator.
    pub unsafe fn recycle(&mut self, class: ClassId, chunk: ChunkPtr) -> Result<(), Misuse> {
        // SAFETY: caller guarantees the header is mapped and ours.
        let header = unsafe { chunk.read() };
        if header.state() == Some(ChunkState::Free) {
            return Err(Misuse::DoubleFree {
                addr: chunk.user_ptr().as_ptr() as usize,
                class,
            });
        }
        // SAFETY: as above; the first usable word now belongs to the list.
        unsafe {
            chunk.set_state(ChunkState::Free);
            chunk.set_next_link(self.heads[class]);
        }
        self.heads[class] = chunk.addr();
        self.lens[class] += 1;
        Ok(())
    }

    /// Pops the most recently recycled chunk of `class` and marks it ALLOCATED.
    ///
    /// `owns` must answer whether an address may be a chunk header of this
    /// allocator; it guards the link read out of the popped chunk.
    ///
    /// # Safety
    ///
    /// Every chunk on the list must have been pushed by [`FreeLists::recycle`].
    pub unsafe fn try_reuse(
        &mut self,
        class: ClassId,
        owns: impl Fn(usize) -> bool,
    ) -> Result<Option<ChunkPtr>, Misuse> {
        let head = self.heads[class];
        // SAFETY: non-nil heads were pushed by `recycle` or checked by `owns`.
        let Some(chunk) = (unsafe { ChunkPtr::from_addr(head) }) else {
            return Ok(None);
        };
        // SAFETY: see above.
        let next = unsafe { check_free(chunk, class, &owns)? };
        // SAFETY: the chunk leaves the list and is handed out.
        unsafe { chunk.set_state(ChunkState::Allocated) };
        self.heads[class] = next;
        self.lens[class] -= 1;
        Ok(Some(chunk))
    }

    /// Number of chunks on the list of `class`.
    #[must_use]
    pub fn len(&self, class: ClassId) -> usize {
        self.lens.get(class).copied().unwrap_or(0)
    }

    /// Chunks across every list.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.lens.iter().sum()
    }

    /// Number of lists.
    #[must_use]
    pub fn classes(&self) -> usize {
        self.heads.len()
    }

    /// Walks the list of `class` without modifying it.
    ///
    /// The walk stops after yielding the first error.
    ///
    /// # Safety
    ///
    /// Same contract as [`FreeLists::try_reuse`].
    pub unsafe fn iter<F: Fn(usize) -> bool>(&self, class: ClassId, owns: F) -> Iter<F> {
        Iter {
            class,
            cursor: self.heads[class],
            remaining: self.lens[class],
            owns,
        }
    }
}

/// Checks that `chunk` is a well-formed FREE chunk of `class` and returns its
/// link.
unsafe fn check_free(
    chunk: ChunkPtr,
    class: ClassId,
    owns: &impl Fn(usize) -> bool,
) -> Result<usize, Misuse> {
    let corrupt = Misuse::CorruptFreeList {
        addr: chunk.addr(),
        class,
    };
    // SAFETY: the chunk address was vetted before being linked.
    let header = unsafe { chunk.read() };
    if header.state() != Some(ChunkState::Free)
        || header.class() != class
        || !header.canary_matches(chunk.addr())
    {
        return Err(corrupt);
    }
    // SAFETY: FREE chunk; the first usable word is the link.
    let next = unsafe { chunk.next_link() };
    if next != NIL && (next % ALIGNMENT != 0 || !owns(next)) {
        return Err(corrupt);
    }
    Ok(next)
}

/// Iterator returned by [`FreeLists::iter`].
pub struct Iter<F> {
    class: ClassId,
    cursor: usize,
    remaining: usize,
    owns: F,
}

impl<F: Fn(usize) -> bool> Iterator for Iter<F> {
    type Item = Result<ChunkPtr, Misuse>;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: the cursor is the list head or a link vetted by `owns`.
        let chunk = unsafe { ChunkPtr::from_addr(self.cursor) }?;
        if self.remaining == 0 {
            // More links than recorded pushes: a cycle or a forged link.
            self.cursor = NIL;
            return Some(Err(Misuse::CorruptFreeList {
                addr: chunk.addr(),
                class: self.class,
            }));
        }
        // SAFETY: see above.
        match unsafe { check_free(chunk, self.class, &self.owns) } {
            Ok(next) => {
                self.cursor = next;
                self.remaining -= 1;
                Some(Ok(chunk))
            }
            Err(misuse) => {
                self.cursor = NIL;
                Some(Err(misuse))
            }
        }
    }
}
