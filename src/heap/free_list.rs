//! The segregated free lists: a fixed array of doubly linked, unordered,
//! null-terminated lists of free blocks, one per size class.
//!
//! Free-list links are "weak pointers" in the sense of the design notes: the
//! list does not own the blocks, it is a lookup structure over blocks that
//! happen to be free. This crate represents a link as the linked block's
//! *header* byte offset inside the owning [`Buffer`], with `0` standing for
//! "no block" (offset `0` falls inside the heap's leading padding and is
//! never a valid block header, so it is safe to use as a sentinel). This is
//! the array-index rendering the design notes explicitly license in place of
//! raw pointers.
//!
//! A free block stores its forward link at `header + 8` and its backward
//! link at `header + 16`, matching the spec's block layout
//! `[header(8) | fwd ptr(8) | back ptr(8) | ... | footer(8)]`.

use super::buffer::Buffer;
use super::header::Header;
use super::size_class::NUM_CLASSES;

const FWD_OFFSET: usize = 8;
const BACK_OFFSET: usize = 16;

/// The array of free-list heads, one per size class.
pub(super) struct FreeLists {
    heads: [u64; NUM_CLASSES],
}
impl FreeLists {
    pub(super) const fn new() -> Self {
        Self { heads: [0; NUM_CLASSES] }
    }

    /// The head offset of `class` (`0` if empty).
    pub(super) fn head(&self, class: usize) -> u64 {
        self.heads[class]
    }

    /// Push `header_offset` onto the front of `class`'s list.
    pub(super) fn insert<const N: usize>(
        &mut self,
        buffer: &mut Buffer<N>,
        header_offset: usize,
        class: usize,
    ) {
        let old_head = self.heads[class];
        buffer.write_word(header_offset + FWD_OFFSET, old_head);
        buffer.write_word(header_offset + BACK_OFFSET, 0);
        if old_head != 0 {
            buffer.write_word(old_head as usize + BACK_OFFSET, header_offset as u64);
        }
        self.heads[class] = header_offset as u64;
    }

    /// Unlink `header_offset` from `class`'s list.
    ///
    /// The caller must know `header_offset` is currently a member of `class`
    /// (the block's own header size determines its class, so callers derive
    /// `class` from `class_of(header.size_bytes())` before calling this).
    pub(super) fn remove<const N: usize>(
        &mut self,
        buffer: &mut Buffer<N>,
        header_offset: usize,
        class: usize,
    ) {
        let fwd = buffer.read_word(header_offset + FWD_OFFSET);
        let back = buffer.read_word(header_offset + BACK_OFFSET);
        if back != 0 {
            buffer.write_word(back as usize + FWD_OFFSET, fwd);
        } else {
            self.heads[class] = fwd;
        }
        if fwd != 0 {
            buffer.write_word(fwd as usize + BACK_OFFSET, back);
        }
    }

    /// First-fit scan for a free block of at least `needed_units` (in units
    /// of 16 bytes), starting at `start_class` and advancing to larger
    /// classes on exhaustion.
    ///
    /// Because classes are bounded above but a request's exact byte count
    /// can land anywhere inside a class, every candidate's actual size is
    /// checked rather than trusting its class membership alone.
    pub(super) fn first_fit<const N: usize>(
        &self,
        buffer: &Buffer<N>,
        needed_units: u64,
        start_class: usize,
    ) -> Option<(usize, usize)> {
        for class in start_class..NUM_CLASSES {
            let mut cursor = self.heads[class];
            while cursor != 0 {
                let offset = cursor as usize;
                let header = Header::from_raw(buffer.read_word(offset));
                if header.size_units() >= needed_units {
                    return Some((offset, class));
                }
                cursor = buffer.read_word(offset + FWD_OFFSET);
            }
        }
        None
    }

    /// Iterate every `(class, header_offset)` pair currently in the lists.
    ///
    /// Used only by the consistency checker, which needs to walk free lists
    /// independently of the heap body.
    pub(super) fn for_each<const N: usize>(
        &self,
        buffer: &Buffer<N>,
        mut visit: impl FnMut(usize, usize),
    ) {
        for class in 0..NUM_CLASSES {
            let mut cursor = self.heads[class];
            while cursor != 0 {
                let offset = cursor as usize;
                visit(class, offset);
                cursor = buffer.read_word(offset + FWD_OFFSET);
            }
        }
    }
}
