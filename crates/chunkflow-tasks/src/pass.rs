//! Passes - resolved filters ready to be scheduled.

use chunkflow_ecs::ChunkSlice;
use smallvec::SmallVec;

use crate::access::{Params, SharedAccess};

/// A matched chunk range plus its offset within the whole pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassRange {
    pub slice: ChunkSlice,
    /// Number of matched entities before this range, across the pass.
    pub offset: usize,
}

/// The chunk ranges handled by one task.
pub type TaskSlice = SmallVec<[PassRange; 4]>;

/// A filter resolved against the world, with its declared access.
#[derive(Clone, Debug)]
pub struct Pass {
    pub(crate) index: usize,
    pub(crate) ranges: Vec<PassRange>,
    pub(crate) entity_count: usize,
    pub(crate) params: Params,
    pub(crate) shared: SmallVec<[SharedAccess; 4]>,
}

impl Pass {
    pub(crate) fn new(
        index: usize,
        slices: Vec<ChunkSlice>,
        params: Params,
        shared: SmallVec<[SharedAccess; 4]>,
    ) -> Self {
        let mut offset = 0;
        let ranges = slices
            .into_iter()
            .map(|slice| {
                let range = PassRange { slice, offset };
                offset += slice.count;
                range
            })
            .collect();

        Self {
            index,
            ranges,
            entity_count: offset,
            params,
            shared,
        }
    }

    /// Position of this pass within its pipeline.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Summed live counts of the matched chunks.
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entity_count
    }

    #[must_use]
    pub fn ranges(&self) -> &[PassRange] {
        &self.ranges
    }

    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn shared(&self) -> &[SharedAccess] {
        &self.shared
    }

    /// Split the matched ranges into task slices of at most `max_slice`
    /// entities each.
    ///
    /// With no limit every chunk range becomes its own slice. A slice may
    /// span several ranges and a range may be split across slices; every
    /// matched row lands in exactly one slice, in pass order.
    #[must_use]
    pub fn split(&self, max_slice: Option<usize>) -> Vec<TaskSlice> {
        let Some(max_slice) = max_slice else {
            return self.ranges.iter().map(|&range| smallvec::smallvec![range]).collect();
        };
        let max_slice = max_slice.max(1);

        let mut slices = Vec::with_capacity(self.entity_count.div_ceil(max_slice));
        let mut current = TaskSlice::new();
        let mut filled = 0;

        for range in &self.ranges {
            let mut taken = 0;
            while taken < range.slice.count {
                let count = (max_slice - filled).min(range.slice.count - taken);
                current.push(PassRange {
                    slice: ChunkSlice {
                        start: range.slice.start + taken,
                        count,
                        ..range.slice
                    },
                    offset: range.offset + taken,
                });
                taken += count;
                filled += count;

                if filled == max_slice {
                    slices.push(std::mem::take(&mut current));
                    filled = 0;
                }
            }
        }
        if !current.is_empty() {
            slices.push(current);
        }

        slices
    }
}

/// A pass without entity data; only shared resources order it.
#[derive(Clone, Debug)]
pub struct CustomPass {
    pub(crate) index: usize,
    pub(crate) shared: SmallVec<[SharedAccess; 4]>,
}

impl CustomPass {
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn shared(&self) -> &[SharedAccess] {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use chunkflow_ecs::ArchetypeId;

    use super::*;

    fn pass(counts: &[usize]) -> Pass {
        let slices = counts
            .iter()
            .enumerate()
            .map(|(chunk, &count)| ChunkSlice {
                archetype: ArchetypeId::from_raw(0),
                chunk,
                start: 0,
                count,
            })
            .collect();
        Pass::new(0, slices, Params::default(), SmallVec::new())
    }

    fn flatten(slices: &[TaskSlice]) -> Vec<(usize, usize)> {
        slices
            .iter()
            .flatten()
            .flat_map(|r| (r.slice.start..r.slice.end()).map(move |row| (r.slice.chunk, row)))
            .collect()
    }

    #[test]
    fn test_offsets() {
        let pass = pass(&[4, 2, 3]);
        let offsets: Vec<_> = pass.ranges().iter().map(|r| r.offset).collect();

        assert_eq!(offsets, vec![0, 4, 6]);
        assert_eq!(pass.entity_count(), 9);
    }

    #[test]
    fn test_split_unbounded_is_per_chunk() {
        let pass = pass(&[4, 2, 3]);
        let slices = pass.split(None);

        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn test_split_spans_and_splits_ranges() {
        let pass = pass(&[4, 2, 3]);
        let slices = pass.split(Some(3));

        let sizes: Vec<usize> = slices
            .iter()
            .map(|s| s.iter().map(|r| r.slice.count).sum())
            .collect();
        assert_eq!(sizes, vec![3, 3, 3]);
        // Second slice: last row of chunk 0 plus all of chunk 1.
        assert_eq!(slices[1].len(), 2);
        assert_eq!(slices[1][0].offset, 3);
    }

    #[test]
    fn test_split_covers_each_row_once() {
        let pass = pass(&[5, 1, 7, 3]);
        let expected = flatten(&pass.split(None));

        for max_slice in [0, 1, 2, 3, 4, 7, 16, 100] {
            let slices = pass.split(Some(max_slice));
            assert_eq!(flatten(&slices), expected, "max_slice = {max_slice}");
            assert!(
                slices
                    .iter()
                    .all(|s| s.iter().map(|r| r.slice.count).sum::<usize>() <= max_slice.max(1))
            );
        }
    }

    #[test]
    fn test_split_empty_pass() {
        let pass = pass(&[]);
        assert!(pass.split(Some(4)).is_empty());
        assert!(pass.split(None).is_empty());
    }
}
