//! Mapping from a byte size to one of the fixed segregated-free-list classes.

/// Number of segregated free-list size classes.
pub(super) const NUM_CLASSES: usize = 13;

/// Upper bound (inclusive) in bytes for each class except the last, which
/// holds everything larger than [`CLASS_BOUNDS`]'s final entry.
const CLASS_BOUNDS: [usize; NUM_CLASSES - 1] = [
    32, 48, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768,
];

/// Map a block size in bytes to its segregated free-list class (`0..NUM_CLASSES`).
pub(super) fn class_of(bytes: usize) -> usize {
    match CLASS_BOUNDS.iter().position(|&bound| bytes <= bound) {
        Some(class) => class,
        None => NUM_CLASSES - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_match_spec_table() {
        assert_eq!(class_of(32), 0);
        assert_eq!(class_of(33), 1);
        assert_eq!(class_of(48), 1);
        assert_eq!(class_of(49), 2);
        assert_eq!(class_of(64), 2);
        assert_eq!(class_of(65), 3);
        assert_eq!(class_of(32768), 11);
        assert_eq!(class_of(32769), 12);
        assert_eq!(class_of(usize::MAX), 12);
    }

    #[test]
    fn every_class_is_reachable() {
        for class in 0..NUM_CLASSES {
            let probe = if class == 0 { 16 } else { CLASS_BOUNDS[class - 1] + 1 };
            assert_eq!(class_of(probe), class);
        }
    }
}
