//! The consistency checker: walks the heap header-by-header and every free
//! list independently, verifying every invariant in the design in one pass.
//! A correctness tool, not a repair tool — it never mutates the heap.

use super::buffer::Buffer;
use super::free_list::FreeLists;
use super::header::{Header, ALIGN, MIN_BLOCK, UNIT};
use super::size_class::class_of;
use super::Heap;

/// Why [`check`] rejected the heap.
///
/// Each variant names the violated invariant from the design and the byte
/// offset (relative to `heap_lo()`) at which it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    /// The prologue's two sentinel words aren't `size = 1, allocated`.
    BadPrologue,
    /// The epilogue isn't `size = 0, allocated`.
    BadEpilogue,
    /// A block's state nibble is the reserved value `2` (this free, prev
    /// free): two adjacent free blocks should have been coalesced.
    ReservedState { offset: usize },
    /// A block's size is not a multiple of 16, or is smaller than the
    /// 32-byte minimum.
    BadBlockSize { offset: usize },
    /// A block's `prev_free` bit disagrees with its predecessor's actual
    /// allocation state.
    PrevFreeMismatch { offset: usize },
    /// An allocated block's payload pointer is not 16-byte aligned.
    Misaligned { offset: usize },
    /// A free block's footer does not match its header.
    FooterMismatch { offset: usize },
    /// A free-list node does not actually point at a free block.
    ListNodeNotFree { offset: usize },
    /// A free-list node is indexed under a class that disagrees with its
    /// size.
    WrongFreeListClass { offset: usize, expected: usize, actual: usize },
    /// A free-list node's `next`/`prev` links are not reciprocal.
    BrokenReciprocalLink { offset: usize },
    /// A free-list node lies outside the heap.
    FreeListPointerOutOfBounds { offset: usize },
    /// The number of free blocks found walking the heap body does not match
    /// the number of entries found walking the free lists: some free block
    /// is missing from its list, or some node is indexed more than once.
    FreeListCountMismatch { in_heap: usize, in_lists: usize },
}

pub(super) fn check<const N: usize>(heap: &Heap<N>) -> Result<(), CheckError> {
    let buffer = &heap.buffer;
    let free_lists = &heap.free_lists;

    check_prologue(buffer)?;
    let free_in_heap = walk_heap(buffer)?;
    let free_in_lists = walk_free_lists(buffer, free_lists)?;

    if free_in_lists != free_in_heap {
        return Err(CheckError::FreeListCountMismatch { in_heap: free_in_heap, in_lists: free_in_lists });
    }
    Ok(())
}

fn check_prologue<const N: usize>(buffer: &Buffer<N>) -> Result<(), CheckError> {
    let first = Header::from_raw(buffer.read_word(8));
    let second = Header::from_raw(buffer.read_word(16));
    let sane = |h: Header| h.size_units() == 1 && h.this_alloc();
    if !sane(first) || !sane(second) {
        return Err(CheckError::BadPrologue);
    }
    Ok(())
}

/// Walk every block from the first real header to the epilogue, checking
/// every per-block invariant. Returns the number of free blocks seen.
fn walk_heap<const N: usize>(buffer: &Buffer<N>) -> Result<usize, CheckError> {
    let mut offset = 24;
    let mut expected_prev_free = false; // the prologue's second word is allocated
    let mut free_blocks = 0usize;

    loop {
        let header = Header::from_raw(buffer.read_word(offset));
        let size = header.size_bytes();

        if size == 0 {
            if !header.this_alloc() {
                return Err(CheckError::BadEpilogue);
            }
            if header.prev_free() != expected_prev_free {
                return Err(CheckError::PrevFreeMismatch { offset });
            }
            return Ok(free_blocks);
        }

        if header.is_reserved_state() {
            return Err(CheckError::ReservedState { offset });
        }
        if size % UNIT != 0 || size < MIN_BLOCK {
            return Err(CheckError::BadBlockSize { offset });
        }
        if header.prev_free() != expected_prev_free {
            return Err(CheckError::PrevFreeMismatch { offset });
        }

        if header.this_alloc() {
            let payload = unsafe { buffer.heap_lo().add(offset + 8) };
            if (payload as usize) % ALIGN != 0 {
                return Err(CheckError::Misaligned { offset });
            }
        } else {
            let footer_offset = offset + size - 8;
            let footer = Header::from_raw(buffer.read_word(footer_offset));
            if footer != header {
                return Err(CheckError::FooterMismatch { offset });
            }
            free_blocks += 1;
        }

        expected_prev_free = !header.this_alloc();
        offset += size;
    }
}

/// Walk every free list, checking that each node is genuinely free, filed
/// under the class its size implies, and reciprocally linked. Returns the
/// total number of nodes seen across all classes.
fn walk_free_lists<const N: usize>(buffer: &Buffer<N>, free_lists: &FreeLists) -> Result<usize, CheckError> {
    let mut total = 0usize;
    let mut error = None;

    free_lists.for_each(buffer, |class, offset| {
        if error.is_some() {
            return;
        }
        if offset < 24 || offset >= buffer.high_water() {
            error = Some(CheckError::FreeListPointerOutOfBounds { offset });
            return;
        }

        let header = Header::from_raw(buffer.read_word(offset));
        if header.this_alloc() {
            error = Some(CheckError::ListNodeNotFree { offset });
            return;
        }
        let actual_class = class_of(header.size_bytes());
        if actual_class != class {
            error = Some(CheckError::WrongFreeListClass { offset, expected: actual_class, actual: class });
            return;
        }

        let fwd = buffer.read_word(offset + 8);
        let back = buffer.read_word(offset + 16);
        if back != 0 && buffer.read_word(back as usize + 8) != offset as u64 {
            error = Some(CheckError::BrokenReciprocalLink { offset });
            return;
        }
        if fwd != 0 && buffer.read_word(fwd as usize + 16) != offset as u64 {
            error = Some(CheckError::BrokenReciprocalLink { offset });
            return;
        }

        total += 1;
    });

    match error {
        Some(e) => Err(e),
        None => Ok(total),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Heap;
    use super::CheckError;

    #[test]
    fn fresh_heap_passes() {
        let heap: Heap<4096> = Heap::new();
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn heap_stays_consistent_across_a_mixed_trace() {
        let mut heap: Heap<8192> = Heap::new();
        let sizes = [8usize, 64, 128, 1024, 16, 2048, 32];
        let live = sizes.map(|size| heap.allocate(size).unwrap());
        heap.check().unwrap();

        for ptr in live.iter().rev() {
            heap.free(*ptr);
            heap.check().unwrap();
        }
    }

    #[test]
    fn reports_reserved_state_as_corruption() {
        // A heap that somehow ended up with two adjacent free blocks (state
        // value 2) must be flagged, never silently accepted.
        let mut heap: Heap<4096> = Heap::new();
        let a = heap.allocate(32).unwrap();
        let _b = heap.allocate(32).unwrap();
        heap.free(a);
        // Manually corrupt: flip the block's own prev_free bit to claim its
        // (allocated) predecessor is free, without doing real coalescing.
        let offset = heap.buffer.offset_of(a.as_ptr()).unwrap() - 8;
        let header = super::Header::from_raw(heap.buffer.read_word(offset));
        let corrupted = header.with_prev_free(true);
        heap.buffer.write_word(offset, corrupted.raw());
        assert!(matches!(heap.check(), Err(CheckError::ReservedState { .. })));
    }
}
