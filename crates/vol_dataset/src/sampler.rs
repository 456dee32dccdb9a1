//! Sharded, ordered sampling for evaluation passes.

use crate::types::{VolDatasetError, VolDatasetResult};

/// Which shard of the dataset this process evaluates.
///
/// Replaces any framework-global parallel environment: callers construct the
/// context explicitly and pass it down. Rank 0 is the reporting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardContext {
    pub rank: usize,
    pub world_size: usize,
}

impl ShardContext {
    pub fn new(rank: usize, world_size: usize) -> VolDatasetResult<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(VolDatasetError::Shard { rank, world_size });
        }
        Ok(Self { rank, world_size })
    }

    /// The single-process context: rank 0 of 1.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }

    pub fn is_reporting(&self) -> bool {
        self.rank == 0
    }
}

impl Default for ShardContext {
    fn default() -> Self {
        Self::single()
    }
}

/// Sample order for one shard of an evaluation pass.
///
/// Batch size is one, nothing is shuffled, and no partial batch is dropped:
/// rank r of w takes indices r, r+w, r+2w, ... so the union over all ranks
/// visits every sample exactly once, in dataset order.
#[derive(Debug, Clone)]
pub struct ShardedSampler {
    total: usize,
    ctx: ShardContext,
}

impl ShardedSampler {
    pub fn new(total: usize, ctx: ShardContext) -> Self {
        Self { total, ctx }
    }

    pub fn indices(&self) -> Vec<usize> {
        (self.ctx.rank..self.total)
            .step_by(self.ctx.world_size)
            .collect()
    }

    /// Number of samples in this shard.
    pub fn len(&self) -> usize {
        if self.ctx.rank >= self.total {
            0
        } else {
            (self.total - self.ctx.rank).div_ceil(self.ctx.world_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_partition_the_dataset() {
        let total = 7;
        let world = 3;
        let mut seen = vec![0usize; total];
        for rank in 0..world {
            let sampler = ShardedSampler::new(total, ShardContext::new(rank, world).unwrap());
            let indices = sampler.indices();
            assert_eq!(indices.len(), sampler.len());
            // Each shard is in dataset order.
            assert!(indices.windows(2).all(|w| w[0] < w[1]));
            for i in indices {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|c| *c == 1));
    }

    #[test]
    fn rank_out_of_range_is_rejected() {
        assert!(ShardContext::new(2, 2).is_err());
        assert!(ShardContext::new(0, 0).is_err());
    }

    #[test]
    fn single_context_covers_everything() {
        let sampler = ShardedSampler::new(4, ShardContext::single());
        assert_eq!(sampler.indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn empty_dataset_yields_empty_shard() {
        let sampler = ShardedSampler::new(0, ShardContext::single());
        assert!(sampler.is_empty());
    }
}
