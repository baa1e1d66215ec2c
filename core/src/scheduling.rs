use std::ops::Range;

/// An iterator splitting a batch of keys into contiguous slices, one per worker.
#[derive(Clone, Debug)]
pub struct SliceIterator {
    range_start: usize,
    slice_size: usize,
    remainder: usize,
    slice_number: usize,
    slices: usize,
}

impl SliceIterator {
    /// Creates a new slice iterator over `len` keys for at most `workers` workers.
    pub fn new(len: usize, workers: usize) -> SliceIterator {
        // never create empty slices
        let slices = workers.clamp(1, len.max(1));

        SliceIterator {
            range_start: 0,
            slice_size: len / slices,
            remainder: len % slices,
            slice_number: 0,
            slices,
        }
    }
}

impl Iterator for SliceIterator {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.slice_number == self.slices {
            return None;
        }

        // spread the remainder over the first slices instead of creating a small last slice
        let slice_size = if self.slice_number < self.remainder {
            self.slice_size + 1
        } else {
            self.slice_size
        };

        let range_end = self.range_start + slice_size;
        let range = self.range_start..range_end;
        self.range_start = range_end;
        self.slice_number += 1;

        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (
            self.slices - self.slice_number,
            Some(self.slices - self.slice_number),
        )
    }
}

impl ExactSizeIterator for SliceIterator {}

/// The shape of a device dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkSize {
    /// The number of work items, a multiple of `local`.
    pub global: usize,
    /// The number of work items in a work group.
    pub local: usize,
}

impl WorkSize {
    /// Computes the dispatch needed to cover `count` keys with groups of `local` items.
    /// It doesn't matter if we overshoot the count since kernels check their bounds.
    pub fn new(count: usize, local: usize) -> Self {
        let local = local.max(1);

        Self {
            global: count.div_ceil(local).max(1) * local,
            local,
        }
    }

    pub fn groups(&self) -> usize {
        self.global / self.local
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::{SliceIterator, WorkSize};

    #[test]
    fn test_slice_iterator_small_batch() {
        let slices = SliceIterator::new(3, 8).collect_vec();

        // never more slices than keys
        assert_eq!(3, slices.len());
        assert!(slices.iter().all(|slice| slice.len() == 1));
    }

    #[test]
    fn test_slice_iterator_empty() {
        let slices = SliceIterator::new(0, 4).collect_vec();

        assert_eq!(1, slices.len());
        assert!(slices[0].is_empty());
    }

    #[test]
    fn test_slice_iterator_remainder() {
        let len = 8 * 100 + 5;
        let slices = SliceIterator::new(len, 8).collect_vec();

        assert_eq!(8, slices.len());
        assert_eq!(len, slices.iter().map(|slice| slice.len()).sum::<usize>());

        // the first slices should have one element more
        assert_eq!(101, slices.first().unwrap().len());
        assert_eq!(100, slices.last().unwrap().len());

        // slices are contiguous
        for (a, b) in slices.iter().tuple_windows() {
            assert_eq!(a.end, b.start);
        }
    }

    #[test]
    fn test_work_size() {
        let work = WorkSize::new(1000, 64);
        assert_eq!(1024, work.global);
        assert_eq!(16, work.groups());

        assert_eq!(64, WorkSize::new(0, 64).global);
    }
}
