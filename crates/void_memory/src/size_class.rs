//! Power-of-two size classes for pooled byte buffers

/// Largest power of two a `usize` can hold
const LARGEST_CLASS: usize = 1 << (usize::BITS - 1);

/// Maps requested lengths onto power-of-two buckets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeClasses {
    min_shift: u32,
    max_shift: u32,
}

impl SizeClasses {
    /// Create classes covering `[min_size, max_size]`, both rounded up to powers of two
    ///
    /// Sizes past the largest representable power of two are clamped to it.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        let min_size = min_size.max(1).checked_next_power_of_two().unwrap_or(LARGEST_CLASS);
        let max_size = max_size
            .max(min_size)
            .checked_next_power_of_two()
            .unwrap_or(LARGEST_CLASS);

        Self {
            min_shift: min_size.trailing_zeros(),
            max_shift: max_size.trailing_zeros(),
        }
    }

    /// Number of classes
    #[inline]
    pub fn count(&self) -> usize {
        (self.max_shift - self.min_shift + 1) as usize
    }

    /// Smallest class size
    #[inline]
    pub fn min_size(&self) -> usize {
        1 << self.min_shift
    }

    /// Largest class size, requests above it are not pooled
    #[inline]
    pub fn max_size(&self) -> usize {
        1 << self.max_shift
    }

    /// Size of the buffers held by class `index`
    #[inline]
    pub fn class_size(&self, index: usize) -> usize {
        1 << (self.min_shift as usize + index)
    }

    /// Class able to hold `len` bytes
    pub fn class_for(&self, len: usize) -> Option<usize> {
        if len > self.max_size() {
            return None;
        }

        let rounded = len.max(self.min_size()).next_power_of_two();
        Some((rounded.trailing_zeros() - self.min_shift) as usize)
    }

    /// Largest class a buffer of `capacity` bytes can serve
    pub fn class_for_capacity(&self, capacity: usize) -> Option<usize> {
        if capacity < self.min_size() {
            return None;
        }

        let floor_shift = usize::BITS - 1 - capacity.leading_zeros();
        let shift = floor_shift.min(self.max_shift);
        Some((shift - self.min_shift) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_lookup() {
        let classes = SizeClasses::new(16, 1024);

        assert_eq!(classes.count(), 7);
        assert_eq!(classes.class_for(1), Some(0));
        assert_eq!(classes.class_for(16), Some(0));
        assert_eq!(classes.class_for(17), Some(1));
        assert_eq!(classes.class_size(1), 32);
        assert_eq!(classes.class_for(1024), Some(6));
        assert_eq!(classes.class_for(1025), None);
    }

    #[test]
    fn test_capacity_lookup() {
        let classes = SizeClasses::new(16, 1024);

        assert_eq!(classes.class_for_capacity(8), None);
        assert_eq!(classes.class_for_capacity(16), Some(0));
        assert_eq!(classes.class_for_capacity(40), Some(1));
        assert_eq!(classes.class_for_capacity(1 << 20), Some(6));
    }

    #[test]
    fn test_bounds_round_up() {
        let classes = SizeClasses::new(10, 1000);
        assert_eq!(classes.min_size(), 16);
        assert_eq!(classes.max_size(), 1024);
    }

    #[test]
    fn test_huge_bounds_clamp_to_largest_class() {
        let classes = SizeClasses::new(16, usize::MAX);
        assert_eq!(classes.max_size(), LARGEST_CLASS);
        assert_eq!(classes.class_for(usize::MAX), None);
        assert_eq!(classes.class_for(LARGEST_CLASS), Some(classes.count() - 1));

        let inverted = SizeClasses::new(usize::MAX, 16);
        assert_eq!(inverted.min_size(), LARGEST_CLASS);
        assert_eq!(inverted.count(), 1);
    }
}
