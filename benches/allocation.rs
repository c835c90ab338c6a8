#![feature(test)]
extern crate test;
use test::Bencher;

use std::alloc::{GlobalAlloc as _, Layout};

mod repeated_allocation_deallocation {
    use super::*;

    /// Run a benchmark, which repeatedly allocates and deallocates the same
    /// block. The benchmark will allocate the given amount of blocks beforehand
    /// (before running the actual benchmark) in order to fill up the heap with
    /// unrelated allocations, so the first-fit scan has to walk past them.
    ///
    /// # Panics
    /// This will panic, if the requested pre-allocations will fill up the whole
    /// heap (so the actual benchmark cannot allocate blocks anymore).
    fn benchmark_with_preallocation(b: &mut Bencher, pre_allocations: usize) {
        let allocator = segalloc::Allocator::<65536>::new();
        let small = Layout::new::<u8>();
        for _ in 0..pre_allocations {
            unsafe { allocator.alloc(small) };
        }

        let ptr = unsafe { allocator.alloc(small) };
        assert_ne!(ptr, std::ptr::null_mut::<u8>());
        unsafe { allocator.dealloc(ptr, small) };

        b.iter(|| {
            let ptr = unsafe { allocator.alloc(small) };
            let ptr = test::black_box(ptr);
            unsafe { allocator.dealloc(ptr, small) };
        });
    }

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 510);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_with_preallocation(b, 1020);
    }
}

mod size_class_spanning_trace {
    use super::*;

    /// A mixed trace of allocation sizes spanning several segregated-list
    /// size classes, freed in reverse order so coalescing runs every time.
    #[bench]
    fn alloc_free_across_classes(b: &mut Bencher) {
        let allocator = segalloc::Allocator::<1_048_576>::new();
        let sizes = [8usize, 64, 256, 1024, 32, 4096, 16];
        let layouts: Vec<Layout> = sizes.iter().map(|&s| Layout::from_size_align(s, 8).unwrap()).collect();

        b.iter(|| {
            let ptrs: Vec<*mut u8> = layouts.iter().map(|&layout| unsafe { allocator.alloc(layout) }).collect();
            for &ptr in ptrs.iter().rev() {
                assert_ne!(ptr, std::ptr::null_mut::<u8>());
            }
            for (i, &ptr) in ptrs.iter().enumerate().rev() {
                unsafe { allocator.dealloc(ptr, layouts[i]) };
            }
        });
    }
}
