use std::ops::Range;

use super::parallel::{ParallelContext, SbpParallel};
use crate::tensor::Shape;

/// Balanced partition of `total` elements into `parts` contiguous ranges.
///
/// The first `total % parts` ranges hold one extra element, so range sizes differ by
/// at most one and always sum to `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancedSplitter {
    total: usize,
    parts: usize,
}

impl BalancedSplitter {
    /// `None` when `parts` is zero.
    pub fn new(total: usize, parts: usize) -> Option<Self> {
        (parts > 0).then_some(BalancedSplitter { total, parts })
    }

    pub fn parts(&self) -> usize {
        self.parts
    }

    /// Range owned by part `index`; empty for out-of-range indices.
    pub fn at(&self, index: usize) -> Range<usize> {
        if index >= self.parts {
            return self.total..self.total;
        }
        let base = self.total / self.parts;
        let extra = self.total % self.parts;
        let start = index * base + index.min(extra);
        let len = base + usize::from(index < extra);
        start..start + len
    }

    /// Whether every part receives at least one element.
    pub fn covers_all_parts(&self) -> bool {
        self.total >= self.parts
    }
}

/// Per-worker shape of a tensor with logical shape `logical` under `sbp`.
///
/// Returns `None` when a split axis is outside the tensor's rank.
pub fn physical_shape(logical: &Shape, sbp: SbpParallel, ctx: &ParallelContext) -> Option<Shape> {
    match sbp {
        SbpParallel::Broadcast | SbpParallel::PartialSum => Some(logical.clone()),
        SbpParallel::Split(axis) => {
            let extent = logical.dim(axis)?;
            let splitter = BalancedSplitter::new(extent, ctx.parallel_num())?;
            let mut shape = logical.clone();
            shape.set_dim(axis, splitter.at(ctx.parallel_id()).len());
            Some(shape)
        }
    }
}
