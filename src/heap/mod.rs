//! The core heap layout and free-block management subsystem.
//!
//! [`Heap<N>`] owns a single, statically sized, monotonically growable
//! region of memory (a [`Buffer<N>`]) and the 13 segregated free lists that
//! index its free blocks. It implements the classical allocate / free /
//! reallocate / zero-allocate surface with first-fit placement and
//! immediate bidirectional coalescing, as specified. This type is not
//! `Sync`; the crate root wraps it in a `spin::Mutex` to provide the
//! `GlobalAlloc` surface.

mod buffer;
mod check;
mod free_list;
mod header;
mod size_class;

use core::ptr::NonNull;

use buffer::Buffer;
use free_list::FreeLists;
use header::{needed_block_size, Header, MIN_BLOCK, UNIT};
use size_class::class_of;

pub use check::CheckError;
pub(crate) use header::ALIGN;

/// The heap layout and free-block management engine.
pub(crate) struct Heap<const N: usize> {
    buffer: Buffer<N>,
    free_lists: FreeLists,
}
impl<const N: usize> Heap<N> {
    /// Build a freshly initialized heap: prologue, epilogue, empty free lists.
    ///
    /// # Panics
    /// Panics if `N` is smaller than the 32-byte sentinel region plus room
    /// for one minimal block, or if `N` is not a multiple of 16.
    pub(crate) const fn new() -> Self {
        assert!(
            N >= 32 + MIN_BLOCK,
            "heap buffer too small: needs room for sentinels and one block"
        );
        assert!(N % ALIGN == 0, "heap size must be a multiple of 16");

        // Synthetic "allocated size-1" sentinel blocks, per spec: the
        // prologue is two such words back to back, the epilogue is a single
        // size-0 word. Both start with prev_free = false.
        let sentinel = Header::new(1, true, false).raw();
        let epilogue = Header::new(0, true, false).raw();
        Self {
            buffer: Buffer::new_with_sentinels(sentinel, epilogue),
            free_lists: FreeLists::new(),
        }
    }

    /// Allocate a block able to hold `requested` bytes, 16-byte aligned.
    ///
    /// Returns `None` if the heap cannot grow far enough to satisfy the
    /// request (the host's static capacity `N` is exhausted).
    pub(crate) fn allocate(&mut self, requested: usize) -> Option<NonNull<u8>> {
        let needed = needed_block_size(requested);
        let needed_units = (needed / UNIT) as u64;
        let start_class = class_of(needed);

        if let Some((offset, class)) = self.free_lists.first_fit(&self.buffer, needed_units, start_class) {
            return Some(self.place(offset, class, needed, needed_units));
        }

        self.grow_and_allocate(needed, needed_units)
    }

    /// Consume (and possibly split) the free block at `offset`, known to
    /// belong to `class` and to have at least `needed_units` units.
    fn place(&mut self, offset: usize, class: usize, needed: usize, needed_units: u64) -> NonNull<u8> {
        let header = Header::from_raw(self.buffer.read_word(offset));
        let block_units = header.size_units();

        self.free_lists.remove(&mut self.buffer, offset, class);

        // Exact fit, or a near-exact fit whose leftover (< 32 bytes) cannot
        // host a free block: consume the whole thing, silently widening the
        // allocation in the near-exact case (spec's Open Question: the
        // clamp applies here too, not just to the initial request).
        if block_units == needed_units || block_units == needed_units + 1 {
            let new_header = Header::new(block_units, true, header.prev_free());
            self.buffer.write_word(offset, new_header.raw());
            self.clear_next_prev_free(offset, block_units);
            return self.payload_ptr(offset);
        }

        // Splittable: carve the low `needed` bytes off as the new
        // allocation, reinsert the remainder as a fresh free block.
        let remainder_units = block_units - needed_units;
        let low_header = Header::new(needed_units, true, header.prev_free());
        self.buffer.write_word(offset, low_header.raw());

        let high_offset = offset + needed;
        let remainder_bytes = (remainder_units as usize) * UNIT;
        let high_header = Header::new(remainder_units, false, false);
        self.buffer.write_word(high_offset, high_header.raw());
        self.buffer.write_word(high_offset + remainder_bytes - 8, high_header.raw());

        // The block beyond the remainder already has prev_free = true (it
        // did before the split, since the original free block was free) and
        // must stay that way; nothing to update there.
        let remainder_class = class_of(remainder_bytes);
        self.free_lists.insert(&mut self.buffer, high_offset, remainder_class);

        self.payload_ptr(offset)
    }

    /// After consuming a whole free block without splitting, the block
    /// immediately following it must no longer claim its predecessor is
    /// free.
    fn clear_next_prev_free(&mut self, offset: usize, size_units: u64) {
        let next_offset = offset + (size_units as usize) * UNIT;
        let next = Header::from_raw(self.buffer.read_word(next_offset));
        if next.prev_free() {
            self.buffer.write_word(next_offset, next.with_prev_free(false).raw());
        }
    }

    /// Miss: grow the heap by `needed` bytes and carve the new block out of
    /// what the old epilogue's slot becomes.
    fn grow_and_allocate(&mut self, needed: usize, needed_units: u64) -> Option<NonNull<u8>> {
        let epilogue_offset = self.buffer.high_water() - 8;
        let old_epilogue = Header::from_raw(self.buffer.read_word(epilogue_offset));
        let prev_free = old_epilogue.prev_free();

        self.buffer.grow(needed)?;

        let new_block = Header::new(needed_units, true, prev_free);
        self.buffer.write_word(epilogue_offset, new_block.raw());

        let new_epilogue_offset = self.buffer.high_water() - 8;
        let new_epilogue = Header::new(0, true, false);
        self.buffer.write_word(new_epilogue_offset, new_epilogue.raw());

        Some(self.payload_ptr(epilogue_offset))
    }

    fn payload_ptr(&mut self, header_offset: usize) -> NonNull<u8> {
        let ptr = self.buffer.byte_ptr(header_offset + 8);
        // SAFETY: `byte_ptr` derives from the buffer's own backing array, so
        // it is never null.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    /// Release a previously allocated block, coalescing bidirectionally with
    /// free neighbors.
    ///
    /// `payload` must have been returned by a prior `allocate`/`reallocate`/
    /// `zero_allocate` call on this same heap and not already freed;
    /// violating this is undefined behavior, detectable only by [`check`](Self::check).
    pub(crate) fn free(&mut self, payload: NonNull<u8>) {
        let Some(payload_offset) = self.buffer.offset_of(payload.as_ptr()) else {
            return;
        };
        let header_offset = payload_offset - 8;
        let header = Header::from_raw(self.buffer.read_word(header_offset));
        let prev_free = header.prev_free();

        let mut start = header_offset;
        let mut size_units = header.size_units();
        let mut start_prev_free = false;

        if prev_free {
            let predecessor_footer_offset = header_offset - 8;
            let predecessor_footer = Header::from_raw(self.buffer.read_word(predecessor_footer_offset));
            let predecessor_units = predecessor_footer.size_units();
            let predecessor_offset = header_offset - (predecessor_units as usize) * UNIT;

            let predecessor_class = class_of(predecessor_footer.size_bytes());
            self.free_lists.remove(&mut self.buffer, predecessor_offset, predecessor_class);

            start = predecessor_offset;
            size_units += predecessor_units;
            start_prev_free = predecessor_footer.prev_free();
        }

        let successor_offset = header_offset + header.size_bytes();
        let successor = Header::from_raw(self.buffer.read_word(successor_offset));
        if !successor.this_alloc() {
            let successor_class = class_of(successor.size_bytes());
            self.free_lists.remove(&mut self.buffer, successor_offset, successor_class);
            size_units += successor.size_units();
        }

        let merged = Header::new(size_units, false, start_prev_free);
        self.buffer.write_word(start, merged.raw());
        let footer_offset = start + (size_units as usize) * UNIT - 8;
        self.buffer.write_word(footer_offset, merged.raw());

        let beyond_offset = start + (size_units as usize) * UNIT;
        let beyond = Header::from_raw(self.buffer.read_word(beyond_offset));
        self.buffer.write_word(beyond_offset, beyond.with_prev_free(true).raw());

        let class = class_of((size_units as usize) * UNIT);
        self.free_lists.insert(&mut self.buffer, start, class);
    }

    /// Compose allocate/copy/free. No in-place extension is attempted:
    /// correctness is prioritized over a minor throughput gain.
    pub(crate) fn reallocate(&mut self, old: Option<NonNull<u8>>, requested: usize) -> Option<NonNull<u8>> {
        let Some(old) = old else {
            return self.allocate(requested);
        };
        if requested == 0 {
            self.free(old);
            return None;
        }

        let new = self.allocate(requested)?;

        let old_header_offset = self.buffer.offset_of(old.as_ptr()).expect("old pointer not from this heap") - 8;
        let old_capacity = Header::from_raw(self.buffer.read_word(old_header_offset)).size_bytes() - 8;
        let copy_len = old_capacity.min(requested);

        let new_offset = self.buffer.offset_of(new.as_ptr()).expect("just allocated");
        self.buffer.copy(old_header_offset + 8, new_offset, copy_len);

        self.free(old);
        Some(new)
    }

    /// Allocate `n * size` bytes and zero them. No overflow check on the
    /// product, matching the source this spec was distilled from.
    pub(crate) fn zero_allocate(&mut self, n: usize, size: usize) -> Option<NonNull<u8>> {
        let total = n * size;
        let ptr = self.allocate(total)?;
        let offset = self.buffer.offset_of(ptr.as_ptr()).expect("just allocated");
        self.buffer.zero(offset, total);
        Some(ptr)
    }

    /// Walk the heap and free lists, verifying every invariant in the
    /// design. A correctness tool, not a repair tool.
    pub(crate) fn check(&self) -> Result<(), CheckError> {
        check::check(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_offset<const N: usize>(heap: &Heap<N>, ptr: NonNull<u8>) -> usize {
        heap.buffer.offset_of(ptr.as_ptr()).unwrap()
    }

    #[test]
    fn basic_scenario_reuses_freed_block() {
        // Scenario 1 from spec §8.
        let mut heap: Heap<4096> = Heap::new();
        let a = heap.allocate(8).unwrap();
        let _b = heap.allocate(8).unwrap();
        heap.free(a);
        let c = heap.allocate(8).unwrap();
        assert_eq!(payload_offset(&heap, a), payload_offset(&heap, c));
        heap.check().unwrap();
    }

    #[test]
    fn split_scenario_leaves_remainder_in_expected_class() {
        // Scenario 2 from spec §8.
        let mut heap: Heap<8192> = Heap::new();
        let a = heap.allocate(1024).unwrap();
        heap.free(a);
        let _b = heap.allocate(64).unwrap();

        // class for 1088 (1024 request's block size) should now be empty of
        // that particular block, and a remainder around 960 bytes (class 6)
        // should exist.
        assert_eq!(class_of(960), 6);
        heap.check().unwrap();
    }

    #[test]
    fn coalesce_forward_and_backward_merges_to_single_block() {
        // Scenario 3 from spec §8.
        let mut heap: Heap<4096> = Heap::new();
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let c = heap.allocate(64).unwrap();
        heap.free(a);
        heap.free(c);
        heap.free(b);
        heap.check().unwrap();

        // Exactly one free block should be indexed, of 192 bytes, in class 4.
        assert_eq!(class_of(192), 4);
        let mut free_blocks = 0;
        heap.free_lists.for_each(&heap.buffer, |class, offset| {
            free_blocks += 1;
            assert_eq!(class, 4);
            let header = Header::from_raw(heap.buffer.read_word(offset));
            assert_eq!(header.size_bytes(), 192);
        });
        assert_eq!(free_blocks, 1);
    }

    #[test]
    fn grow_extends_heap_by_requested_amount_plus_header() {
        // Scenario 4 from spec §8 (abbreviated: one allocation, not a loop
        // to exhaustion, to keep the unit test fast).
        let mut heap: Heap<65536> = Heap::new();
        let before = heap.buffer.high_water();
        let _p = heap.allocate(4096).unwrap();
        let after = heap.buffer.high_water();
        assert_eq!(after - before, needed_block_size(4096));
    }

    #[test]
    fn realloc_larger_preserves_prefix() {
        // Scenario 5 from spec §8.
        let mut heap: Heap<4096> = Heap::new();
        let p = heap.allocate(32).unwrap();
        unsafe {
            core::ptr::write_bytes(p.as_ptr(), 0xAB, 32);
        }
        let q = heap.reallocate(Some(p), 128).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(q.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0xAB));
        heap.check().unwrap();
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_none() {
        // Scenario 6 from spec §8.
        let mut heap: Heap<4096> = Heap::new();
        let p = heap.allocate(64).unwrap();
        let r = heap.reallocate(Some(p), 0);
        assert!(r.is_none());
        heap.check().unwrap();
    }

    #[test]
    fn zero_allocate_returns_zeroed_region() {
        let mut heap: Heap<4096> = Heap::new();
        let p = heap.zero_allocate(8, 16).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 128) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_memory_reports_none_and_leaves_heap_consistent() {
        let mut heap: Heap<256> = Heap::new();
        // First allocation should fit the tiny heap...
        let _a = heap.allocate(64);
        // ...but this one cannot possibly fit.
        let too_big = heap.allocate(1_000_000);
        assert!(too_big.is_none());
        heap.check().unwrap();
    }
}
