//! Partition selection for outbound records.

use rand::Rng;

/// Chooses the partition for each outbound record.
///
/// Picking uniformly across a small range deliberately breaks cross-partition
/// ordering, which is the point when stress-testing rebalances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartitionSelector {
    /// Leave assignment to the client library's partitioner.
    #[default]
    Default,
    /// Pick uniformly from `0..count`.
    Random { count: u32 },
}

impl PartitionSelector {
    /// Random selection over `0..count`, or `Default` when `count` is zero or absent.
    pub fn from_count(count: Option<u32>) -> Self {
        match count {
            Some(count) if count > 0 => PartitionSelector::Random { count },
            _ => PartitionSelector::Default,
        }
    }

    /// Partition for the next record, or `None` to let the client decide.
    pub fn pick(&self) -> Option<i32> {
        self.pick_with(&mut rand::thread_rng())
    }

    /// Same as [`pick`](Self::pick) with a caller-supplied generator.
    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<i32> {
        match *self {
            PartitionSelector::Default => None,
            PartitionSelector::Random { count } => {
                let partition = rng.gen_range(0..count);
                i32::try_from(partition).ok()
            }
        }
    }

    /// True when `partition` could have been produced by this selector.
    pub fn allows(&self, partition: Option<i32>) -> bool {
        match (*self, partition) {
            (PartitionSelector::Default, None) => true,
            (PartitionSelector::Random { count }, Some(p)) => {
                u32::try_from(p).is_ok_and(|p| p < count)
            }
            _ => false,
        }
    }
}
