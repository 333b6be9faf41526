//! Shard - Per-Rank Epoch Index Partitioning
//!
//! `ShardedLoader` wraps an `EpochLoader` so each rank trains on a
//! disjoint, equal-size slice of every epoch:
//!
//! 1. Each rank computes its local epoch order, then receives rank 0's
//!    order via broadcast, so all ranks agree on one canonical order
//!    even when local shuffling diverges. A rank whose local epoch
//!    length disagrees with the canonical length fails immediately with
//!    `EpochOutOfSync` instead of desynchronizing the padding math.
//! 2. The canonical order is padded by repeating indices from its start
//!    until the length is divisible by the world size. Padding reuses
//!    real indices; it never fabricates out-of-range ones.
//! 3. Each rank takes the contiguous slice
//!    `[rank * n_padded / world, (rank + 1) * n_padded / world)`.
//!
//! When results are gathered back across ranks, the padded duplicates
//! must not skew metrics. The loader tracks how many samples this rank
//! has consumed this epoch and `to_detach` trims the summed per-rank
//! overflow off the end of every gathered tensor, restoring exactly the
//! true epoch.
//!
//! @version 0.1.0
//! @author `Tessera` Development Team

use tessera_core::{Error, Result, Tensor};
use tessera_data::{find_batch_size, Batch, EpochLoader};

use crate::group::{default_group, ProcessGroup};

// =============================================================================
// Helpers
// =============================================================================

/// Rounds `n` up to the nearest multiple of `multiple`.
pub(crate) fn round_to_multiple(n: usize, multiple: usize) -> usize {
    n.div_ceil(multiple.max(1)) * multiple.max(1)
}

/// Per-epoch shard geometry, recorded when the epoch order is computed.
#[derive(Debug, Clone, Copy)]
struct EpochState {
    /// True epoch length, identical on every rank.
    n: usize,
    /// Epoch length rounded up to a multiple of the world size.
    n_padded: usize,
}

// =============================================================================
// ShardedLoader
// =============================================================================

/// An `EpochLoader` that splits every epoch into equal per-rank shards.
pub struct ShardedLoader {
    inner: Box<dyn EpochLoader>,
    group: Option<ProcessGroup>,
    rank: usize,
    world_size: usize,
    epoch: Option<EpochState>,
    cursor: Option<usize>,
}

impl ShardedLoader {
    /// Wraps a loader using the process-wide default group. Without an
    /// active group this behaves as a single-rank pass-through.
    pub fn new(inner: Box<dyn EpochLoader>) -> Self {
        let group = default_group();
        let (rank, world_size) = group
            .as_ref()
            .map_or((0, 1), |g| (g.rank(), g.world_size().max(1)));
        Self {
            inner,
            group,
            rank,
            world_size,
            epoch: None,
            cursor: None,
        }
    }

    /// Wraps a loader with an explicit group.
    pub fn with_group(inner: Box<dyn EpochLoader>, group: ProcessGroup) -> Self {
        let rank = group.rank();
        let world_size = group.world_size().max(1);
        Self {
            inner,
            group: Some(group),
            rank,
            world_size,
            epoch: None,
            cursor: None,
        }
    }

    /// Wraps a loader with explicit rank/world-size and no collective
    /// backend. The canonical-order broadcast is skipped; useful for
    /// exercising the shard arithmetic deterministically.
    pub fn with_rank(inner: Box<dyn EpochLoader>, rank: usize, world_size: usize) -> Self {
        let world_size = world_size.max(1);
        debug_assert!(rank < world_size);
        Self {
            inner,
            group: None,
            rank,
            world_size,
            epoch: None,
            cursor: None,
        }
    }

    /// Wraps `loader` unless it is already sharded.
    pub fn wrap(loader: Box<dyn EpochLoader>) -> Box<dyn EpochLoader> {
        Self::wrap_in(loader, None)
    }

    /// Wraps `loader` with the given group (or the default group when
    /// `None`), unless it is already sharded.
    pub fn wrap_in(
        loader: Box<dyn EpochLoader>,
        group: Option<ProcessGroup>,
    ) -> Box<dyn EpochLoader> {
        if loader.is_sharded() {
            return loader;
        }
        match group {
            Some(g) => Box::new(Self::with_group(loader, g)),
            None => Box::new(Self::new(loader)),
        }
    }

    /// Returns this loader's rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Returns this loader's world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Gathers every leaf of a batch across ranks, rank-major.
    fn gather_batch(&self, batch: Batch) -> Result<Batch> {
        match &self.group {
            Some(group) if group.world_size() > 1 => {
                batch.try_map(&|t| group.all_gather_concat(&t))
            }
            _ => Ok(batch),
        }
    }

    /// Strips trailing padding artifacts from a gathered batch.
    ///
    /// For each rank `r` the overflow is how far past the true epoch
    /// length its reads have run:
    /// `min(0, max(-len/ws, n - (cursor + r * n_padded / ws)))`.
    /// The summed overflow is trimmed off the end of every leaf with at
    /// least one dimension. Requires the full shard state; otherwise
    /// the batch passes through unchanged.
    fn unpad(&self, batch: Batch) -> Result<Batch> {
        let (Some(cursor), Some(epoch)) = (self.cursor, self.epoch) else {
            return Ok(batch);
        };
        let ws = self.world_size;
        let per_rank = (epoch.n_padded / ws) as i64;
        batch.try_map(&|t: Tensor| {
            if t.ndim() == 0 {
                return Ok(t);
            }
            let len = t.len0() as i64;
            let floor = -(len / ws as i64);
            let mut overflow = 0i64;
            for r in 0..ws {
                let read_to = cursor as i64 + r as i64 * per_rank;
                overflow += (epoch.n as i64 - read_to).max(floor).min(0);
            }
            if overflow == 0 {
                Ok(t)
            } else {
                let keep = (len + overflow).max(0) as usize;
                t.slice_rows(0, keep)
            }
        })
    }
}

impl EpochLoader for ShardedLoader {
    /// All ranks report the same per-rank batch count, even when the
    /// underlying length is not divisible by the world size.
    fn num_batches(&self) -> usize {
        round_to_multiple(self.inner.num_batches(), self.world_size) / self.world_size
    }

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn dataset_len(&self) -> usize {
        self.inner.dataset_len()
    }

    fn get_idxs(&mut self) -> Result<Vec<usize>> {
        // Compute locally on every rank (sizes must agree), then adopt
        // rank 0's order so independent shuffles cannot diverge.
        let mut idxs = self.inner.get_idxs()?;
        if let Some(group) = &self.group {
            if group.world_size() > 1 {
                let local_len = idxs.len();
                idxs = group.broadcast_indices(idxs, 0);
                if idxs.len() != local_len {
                    return Err(Error::EpochOutOfSync {
                        rank: self.rank,
                        local: local_len,
                        canonical: idxs.len(),
                    });
                }
            }
        }

        let n = idxs.len();
        let n_padded = round_to_multiple(n, self.world_size);
        self.epoch = Some(EpochState { n, n_padded });
        if n == 0 {
            return Ok(Vec::new());
        }

        // Wrap-around padding: repeat from the start until divisible.
        let pad: Vec<usize> = idxs.iter().copied().cycle().take(n_padded - n).collect();
        idxs.extend(pad);

        let per_rank = n_padded / self.world_size;
        tracing::debug!(
            rank = self.rank,
            n,
            n_padded,
            per_rank,
            "sharded epoch indices"
        );
        Ok(idxs[self.rank * per_rank..(self.rank + 1) * per_rank].to_vec())
    }

    fn before_iter(&mut self) {
        self.cursor = Some(0);
        self.inner.before_iter();
    }

    fn randomize(&mut self) {
        self.inner.randomize();
    }

    fn create_batches(&self, idxs: &[usize]) -> Vec<Batch> {
        self.inner.create_batches(idxs)
    }

    fn after_batch(&mut self, batch: Batch) -> Batch {
        if let Some(cursor) = &mut self.cursor {
            *cursor += find_batch_size(&batch);
        }
        self.inner.after_batch(batch)
    }

    fn after_iter(&mut self) {
        self.inner.after_iter();
    }

    fn to_detach(&self, batch: Batch, cpu: bool, gather: bool) -> Result<Batch> {
        let batch = self.inner.to_detach(batch, cpu, gather)?;
        if !gather {
            return Ok(batch);
        }
        let batch = self.gather_batch(batch)?;
        self.unpad(batch)
    }

    fn is_sharded(&self) -> bool {
        true
    }

    fn unshard(self: Box<Self>) -> Box<dyn EpochLoader> {
        self.inner
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Loader with a fixed epoch order; batches are leaf tensors whose
    /// values are the sample indices.
    struct StubLoader {
        order: Vec<usize>,
        bs: usize,
    }

    impl StubLoader {
        fn new(n: usize, bs: usize) -> Self {
            Self {
                order: (0..n).collect(),
                bs,
            }
        }

        fn boxed(n: usize, bs: usize) -> Box<dyn EpochLoader> {
            Box::new(Self::new(n, bs))
        }
    }

    impl EpochLoader for StubLoader {
        fn num_batches(&self) -> usize {
            self.order.len().div_ceil(self.bs)
        }

        fn batch_size(&self) -> usize {
            self.bs
        }

        fn dataset_len(&self) -> usize {
            self.order.len()
        }

        fn get_idxs(&mut self) -> Result<Vec<usize>> {
            Ok(self.order.clone())
        }

        fn create_batches(&self, idxs: &[usize]) -> Vec<Batch> {
            idxs.chunks(self.bs)
                .map(|chunk| {
                    let values: Vec<f32> = chunk.iter().map(|&i| i as f32).collect();
                    Batch::Leaf(Tensor::from_vec(values, &[chunk.len()]).unwrap())
                })
                .collect()
        }

        fn unshard(self: Box<Self>) -> Box<dyn EpochLoader> {
            self
        }
    }

    #[test]
    fn test_round_to_multiple() {
        assert_eq!(round_to_multiple(10, 3), 12);
        assert_eq!(round_to_multiple(12, 3), 12);
        assert_eq!(round_to_multiple(0, 3), 0);
        assert_eq!(round_to_multiple(1, 4), 4);
    }

    #[test]
    fn test_shards_are_equal_contiguous_slices() {
        // n=10, ws=3: n_padded=12, shard size 4, wrap-around pads 0, 1.
        let expected = [vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9, 0, 1]];
        for rank in 0..3 {
            let mut dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), rank, 3);
            let shard = dl.get_idxs().unwrap();
            assert_eq!(shard, expected[rank]);
        }
    }

    #[test]
    fn test_shard_union_reconstructs_epoch() {
        let n = 10;
        let ws = 3;
        let mut all = Vec::new();
        for rank in 0..ws {
            let mut dl = ShardedLoader::with_rank(StubLoader::boxed(n, 4), rank, ws);
            all.extend(dl.get_idxs().unwrap());
        }
        // Concatenated shards are the canonical order plus its wrapped
        // prefix; the first n entries are exactly the epoch.
        assert_eq!(all.len(), round_to_multiple(n, ws));
        assert_eq!(&all[..n], &(0..n).collect::<Vec<_>>()[..]);
        assert_eq!(&all[n..], &[0, 1]);
    }

    #[test]
    fn test_num_batches_padded() {
        // 10 samples, batch size 4 -> 3 base batches; ws=2 -> 2 each.
        let dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), 0, 2);
        assert_eq!(dl.num_batches(), 2);
        assert_eq!(dl.batch_size(), 4);
        assert_eq!(dl.dataset_len(), 10);
    }

    #[test]
    fn test_empty_epoch_yields_empty_shards() {
        for rank in 0..3 {
            let mut dl = ShardedLoader::with_rank(StubLoader::boxed(0, 4), rank, 3);
            assert_eq!(dl.num_batches(), 0);
            assert!(dl.get_idxs().unwrap().is_empty());
        }
    }

    #[test]
    fn test_single_rank_is_pass_through() {
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(7, 2), 0, 1);
        assert_eq!(dl.get_idxs().unwrap(), (0..7).collect::<Vec<_>>());
        assert_eq!(dl.num_batches(), 4);

        // With the whole epoch consumed, nothing is trimmed.
        dl.before_iter();
        let batch = Batch::Leaf(Tensor::from_vec(vec![0.0; 7], &[7]).unwrap());
        let batch = dl.after_batch(batch);
        let out = dl.to_detach(batch, true, true).unwrap();
        assert_eq!(find_batch_size(&out), 7);
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let wrapped = ShardedLoader::wrap(StubLoader::boxed(10, 4));
        assert!(wrapped.is_sharded());
        let rewrapped = ShardedLoader::wrap(wrapped);
        assert!(rewrapped.is_sharded());
        // A single unshard recovers the plain loader, proving only one
        // layer of wrapping was installed.
        let inner = rewrapped.unshard();
        assert!(!inner.is_sharded());
        assert_eq!(inner.dataset_len(), 10);
    }

    #[test]
    fn test_after_batch_advances_cursor() {
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), 0, 3);
        dl.before_iter();
        assert_eq!(dl.cursor, Some(0));

        let batch = Batch::pair(Tensor::zeros(&[4, 2]), Tensor::zeros(&[4]));
        let _ = dl.after_batch(batch);
        assert_eq!(dl.cursor, Some(4));
    }

    #[test]
    fn test_unpad_trims_exact_overflow() {
        // n=10, ws=3: gathered batch of 12 carries 2 padding rows.
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), 0, 3);
        let _ = dl.get_idxs().unwrap();
        dl.before_iter();
        dl.cursor = Some(4); // each rank consumed its full shard

        let gathered = Batch::Leaf(
            Tensor::from_vec((0..12).map(|i| i as f32).collect(), &[12]).unwrap(),
        );
        let out = dl.unpad(gathered).unwrap();
        let leaves = out.leaves();
        assert_eq!(leaves[0].len0(), 10);
        assert_eq!(
            leaves[0].to_vec(),
            (0..10).map(|i| i as f32).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_unpad_mid_epoch_keeps_everything() {
        // Before any rank has read past n, no trimming happens.
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(10, 2), 0, 3);
        let _ = dl.get_idxs().unwrap();
        dl.before_iter();
        dl.cursor = Some(2); // first batch of each rank: reads end at 2, 6, 10

        let gathered = Batch::Leaf(Tensor::zeros(&[6]));
        let out = dl.unpad(gathered).unwrap();
        assert_eq!(find_batch_size(&out), 6);
    }

    #[test]
    fn test_unpad_applies_element_wise_to_tuples() {
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), 0, 3);
        let _ = dl.get_idxs().unwrap();
        dl.before_iter();
        dl.cursor = Some(4);

        let gathered = Batch::pair(Tensor::zeros(&[12, 2]), Tensor::zeros(&[12]));
        let out = dl.unpad(gathered).unwrap();
        let leaves = out.leaves();
        assert_eq!(leaves[0].shape(), &[10, 2]);
        assert_eq!(leaves[1].shape(), &[10]);
    }

    #[test]
    fn test_unpad_skips_scalars() {
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), 0, 3);
        let _ = dl.get_idxs().unwrap();
        dl.before_iter();
        dl.cursor = Some(4);

        let out = dl.unpad(Batch::Leaf(Tensor::scalar(0.5))).unwrap();
        assert_eq!(out, Batch::Leaf(Tensor::scalar(0.5)));
    }

    #[test]
    fn test_to_detach_passes_through_without_state() {
        // No get_idxs/before_iter yet: shard state incomplete.
        let dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), 0, 3);
        let batch = Batch::Leaf(Tensor::zeros(&[12]));
        let out = dl.to_detach(batch.clone(), true, true).unwrap();
        assert_eq!(out, batch);
    }

    #[test]
    fn test_to_detach_without_gather_skips_trim() {
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(10, 4), 0, 3);
        let _ = dl.get_idxs().unwrap();
        dl.before_iter();
        dl.cursor = Some(4);

        let batch = Batch::Leaf(Tensor::zeros(&[4]));
        let out = dl.to_detach(batch.clone(), true, false).unwrap();
        assert_eq!(out, batch);
    }

    #[test]
    fn test_heavily_padded_epoch() {
        // n=2, ws=4: n_padded=4, each shard one sample, ranks 2 and 3
        // hold pure padding.
        let expected = [vec![0], vec![1], vec![0], vec![1]];
        for rank in 0..4 {
            let mut dl = ShardedLoader::with_rank(StubLoader::boxed(2, 1), rank, 4);
            assert_eq!(dl.get_idxs().unwrap(), expected[rank]);
        }

        // After one batch per rank, a gathered batch of 4 trims to 2.
        let mut dl = ShardedLoader::with_rank(StubLoader::boxed(2, 1), 0, 4);
        let _ = dl.get_idxs().unwrap();
        dl.before_iter();
        dl.cursor = Some(1);
        let out = dl.unpad(Batch::Leaf(Tensor::zeros(&[4]))).unwrap();
        assert_eq!(find_batch_size(&out), 2);
    }
}
