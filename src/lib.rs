//! A segregated-fit memory allocator for embedded systems.
//!
//! This crate provides a single type called [`Allocator`]. This type implements
//! the [`core::alloc::GlobalAlloc`]-trait, which is required to use the
//! [`alloc`-crate][alloc] on `#![no_std]`-targets. Unlike a simple
//! linear-scan allocator, this one indexes free blocks by size into 13
//! segregated free lists and coalesces adjacent free blocks immediately, so
//! fragmentation stays low across a long-running mixed trace of small and
//! large allocations.
//!
//! # Usage
//! The usage is simple: just copy and paste the following code snippet into
//! your binary crate and potentially adjust the number of bytes of the heap
//! (here 64K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: segalloc::Allocator<65536> = segalloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore. Now you can just `use alloc::vec::Vec` or even
//! `use alloc::collections::HashMap`, i.e. every fancy collection which is
//! normally provided by the `std`.
//!
//! The minimal buffer size is 64 bytes (room for the prologue/epilogue plus
//! one minimal 32-byte block). Adjust the size as necessary, e.g. by doing a
//! worst-case calculation and adding some backup space of 10% (for example).
//!
//! Note to users with things like `MPU`s, `MMU`s, etc.: your device might
//! support things like memory remapping or memory protection with setting
//! read/write/execution rights. This crate _doesn't use_ those features at all!
//! If that is desired, you should take the address of the buffer and use that
//! along with the known size `N` to protect the heap memory.
//!
//! # Implementation
//! The heap is a sequence of 16-byte-aligned blocks between a synthetic
//! prologue and epilogue, each block carrying an 8-byte bit-packed header
//! (`size_units : 60 | state : 4`). Free blocks additionally carry a footer
//! (a copy of the header) at their last word, used only to recover a free
//! predecessor's header during backward coalescing; allocated blocks have no
//! footer, that space is payload. A block's header also records whether its
//! *predecessor* is free, so backward coalescing never needs to scan.
//!
//! Free blocks are indexed by size into 13 segregated, doubly linked, LIFO
//! free lists. `allocate` scans first-fit starting at the requested size's
//! class and widening to larger classes on exhaustion, splitting a block
//! when the remainder would still be large enough to be useful, and
//! consuming it whole otherwise. `free` coalesces immediately in both
//! directions before reinserting the result.
//!
//! Because this crate has no backing `sbrk`-like host, "growing" the heap
//! means advancing a high-water mark inside the fixed `N`-byte buffer that
//! is part of the `Allocator<N>` value itself; once that buffer is
//! exhausted, allocation fails exactly as it would on a real host refusing
//! to grow the heap further. The heap never shrinks; memory is returned to
//! the free lists, never to anything outside this crate.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![cfg_attr(not(feature = "std"), no_std)]

mod heap;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use heap::{Heap, ALIGN};
pub use heap::CheckError;

/// The memory allocator for embedded systems.
///
/// This is the core type of this crate: it is an allocator with a predefined
/// heap size. Therefore the heap memory usage is statically limited to an upper
/// value, which also helps to prevent issues with heap/stack-smashes, as the
/// heap is counted to the static memory (e.g. `.data`/`.bss`-sections). Such a
/// smash might still happen though, if the stack pointer grows into the heap,
/// but the heap cannot grow into the stack pointer.
///
/// Its usage is simple: just copy and paste the following in the binary crate
/// you're developing. The memory size of the heap is `65536` or 64K in this
/// example. Adjust that value to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: segalloc::Allocator<65536> = segalloc::Allocator::new();
/// ```
/// Also please refer to the [crate-level](crate)-documentation for
/// recommendations on the buffer size and general usage.
pub struct Allocator<const N: usize>(spin::Mutex<Heap<N>>);
impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the allocator.
    ///
    /// Please see the [crate-level](crate)-documentation for recommendations on
    /// the buffer size and general usage.
    ///
    /// # Panics
    /// This function will panic if the supplied buffer size `N` is too small
    /// to hold the sentinel region plus one minimal block (64 bytes), or if
    /// it is not a multiple of 16.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self(spin::Mutex::new(Heap::new()))
    }

    /// Walk the heap and free lists, verifying every design invariant.
    ///
    /// This is a pure inspection; it never mutates the heap and is safe to
    /// call at any time, including between other allocator calls (it takes
    /// the same lock `alloc`/`dealloc` do, so it cannot race them). `marker`
    /// is an arbitrary caller-chosen tag (e.g. a line number) threaded into
    /// the `std`-only diagnostic print, to tell repeated call sites apart; it
    /// has no effect on the result itself.
    pub fn check(&self, marker: u32) -> Result<(), CheckError> {
        let result = self.0.lock().check();
        #[cfg(feature = "std")]
        if let Err(error) = result {
            std::eprintln!("segalloc: heap check failed at marker {marker}: {error:?}");
        }
        #[cfg(not(feature = "std"))]
        let _ = marker;
        result
    }
}
impl<const N: usize> Default for Allocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// This crate never supports alignment stricter than 16 bytes; a `Layout`
/// asking for more cannot be satisfied.
fn alignment_supported(layout: Layout) -> bool {
    layout.align() <= ALIGN
}

/// `GlobalAlloc` requires a zero-sized request to still return a valid,
/// non-null, appropriately aligned pointer that is safe to pass to `dealloc`,
/// so the smallest real request ever made of the heap is 1 byte.
fn nonzero_size(layout: Layout) -> usize {
    layout.size().max(1)
}

// SAFETY: `Heap::allocate` always returns either `None` or a pointer to a
// live, distinct, 16-byte-aligned block of at least the requested size that
// remains valid (not reused) until the matching `free`; `Heap::free` is only
// ever called here with a pointer previously produced by this same heap's
// `allocate`/`reallocate`/`zero_allocate`. The `spin::Mutex` serializes all
// access, so `Heap`'s methods (which assume single-threaded use) are never
// called reentrantly or concurrently.
unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !alignment_supported(layout) {
            return core::ptr::null_mut();
        }
        match self.0.lock().allocate(nonzero_size(layout)) {
            Some(ptr) => ptr.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.0.lock().free(ptr);
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !alignment_supported(layout) {
            return core::ptr::null_mut();
        }
        match self.0.lock().zero_allocate(1, nonzero_size(layout)) {
            Some(ptr) => ptr.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if !alignment_supported(layout) {
            return core::ptr::null_mut();
        }
        let old = NonNull::new(ptr);
        match self.0.lock().reallocate(old, new_size.max(1)) {
            Some(ptr) => ptr.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }
}
