//! Ordered sample loading with bounded prefetch.

use crate::catalog::EvalDataset;
use crate::sampler::ShardedSampler;
use crate::types::{EvalSample, VolDatasetResult};
use rayon::prelude::*;
use std::collections::VecDeque;

/// Pulls samples for one evaluation pass, in sampler order.
///
/// `num_workers == 0` loads each sample synchronously on the calling thread;
/// `num_workers > 0` prefetches that many samples ahead in parallel. Either
/// way every index in the shard is yielded exactly once, in order. A fresh
/// loader is built per pass, so the underlying dataset stays restartable.
pub struct EvalLoader<'d, D: EvalDataset + Sync> {
    dataset: &'d D,
    order: Vec<usize>,
    cursor: usize,
    prefetch: usize,
    buffer: VecDeque<(usize, VolDatasetResult<EvalSample>)>,
}

impl<'d, D: EvalDataset + Sync> EvalLoader<'d, D> {
    pub fn new(dataset: &'d D, sampler: &ShardedSampler, num_workers: usize) -> Self {
        Self {
            dataset,
            order: sampler.indices(),
            cursor: 0,
            prefetch: num_workers,
            buffer: VecDeque::new(),
        }
    }

    /// Number of samples this loader will yield in total.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Next (dataset index, sample) pair, or `None` once the shard is done.
    pub fn next_sample(&mut self) -> Option<(usize, VolDatasetResult<EvalSample>)> {
        if self.buffer.is_empty() {
            self.refill();
        }
        self.buffer.pop_front()
    }

    fn refill(&mut self) {
        if self.cursor >= self.order.len() {
            return;
        }
        let chunk = self.prefetch.max(1);
        let end = (self.cursor + chunk).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        if chunk == 1 {
            let idx = slice[0];
            self.buffer.push_back((idx, self.dataset.sample(idx)));
            return;
        }

        let mut loaded: Vec<_> = slice
            .par_iter()
            .enumerate()
            .map(|(i, &idx)| (i, idx, self.dataset.sample(idx)))
            .collect();
        loaded.sort_by_key(|(i, _, _)| *i);
        for (_, idx, res) in loaded {
            self.buffer.push_back((idx, res));
        }
    }
}
