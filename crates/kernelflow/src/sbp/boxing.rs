//! Host-side sharding and reconstruction of `f32` tensors.
//!
//! `reconstruct(shard(x))` is the identity for every parallel, and an operator's
//! signature is valid when reconstructing its per-worker outputs reproduces the
//! single-worker result.

use anyhow::{bail, ensure, Result};

use super::parallel::SbpParallel;
use super::splitter::BalancedSplitter;
use crate::tensor::Shape;

/// One worker's portion of a tensor. `values.len()` always equals `shape.elem_cnt()`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostShard {
    shape: Shape,
    values: Vec<f32>,
}

impl HostShard {
    pub fn new(shape: Shape, values: Vec<f32>) -> Result<Self> {
        ensure!(
            shape.elem_cnt() == values.len(),
            "shard shape {} holds {} elements, got {}",
            shape,
            shape.elem_cnt(),
            values.len()
        );
        Ok(HostShard { shape, values })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Number of contiguous blocks before `axis` and elements per unit of `axis`.
fn outer_inner(shape: &Shape, axis: usize) -> (usize, usize) {
    let dims = shape.dims();
    let outer = dims[..axis].iter().product();
    let inner = dims[axis + 1..].iter().product();
    (outer, inner)
}

/// Distributes `logical` across `parallel_num` workers according to `sbp`.
///
/// A partial-sum distribution places the whole value on worker 0 and zeros elsewhere.
pub fn shard(logical: &HostShard, sbp: SbpParallel, parallel_num: usize) -> Result<Vec<HostShard>> {
    ensure!(parallel_num > 0, "parallel_num must be at least 1");
    match sbp {
        SbpParallel::Broadcast => Ok(vec![logical.clone(); parallel_num]),
        SbpParallel::PartialSum => {
            let zeros = HostShard {
                shape: logical.shape.clone(),
                values: vec![0.0; logical.values.len()],
            };
            let mut shards = vec![logical.clone()];
            shards.resize(parallel_num, zeros);
            Ok(shards)
        }
        SbpParallel::Split(axis) => {
            let Some(extent) = logical.shape.dim(axis) else {
                bail!("cannot split {} on axis {}", logical.shape, axis);
            };
            let (outer, inner) = outer_inner(&logical.shape, axis);
            let Some(splitter) = BalancedSplitter::new(extent, parallel_num) else {
                bail!("parallel_num must be at least 1");
            };
            let mut shards = Vec::with_capacity(parallel_num);
            for part in 0..parallel_num {
                let range = splitter.at(part);
                let mut shape = logical.shape.clone();
                shape.set_dim(axis, range.len());
                let mut values = Vec::with_capacity(shape.elem_cnt());
                for block in 0..outer {
                    let base = block * extent * inner;
                    values.extend_from_slice(
                        &logical.values[base + range.start * inner..base + range.end * inner],
                    );
                }
                shards.push(HostShard { shape, values });
            }
            Ok(shards)
        }
    }
}

/// Rebuilds the logical tensor from per-worker shards.
pub fn reconstruct(shards: &[HostShard], sbp: SbpParallel) -> Result<HostShard> {
    let Some(first) = shards.first() else {
        bail!("cannot reconstruct from zero shards");
    };
    match sbp {
        SbpParallel::Broadcast => Ok(first.clone()),
        SbpParallel::PartialSum => {
            let mut sum = first.clone();
            for shard in &shards[1..] {
                ensure!(
                    shard.shape == sum.shape,
                    "partial-sum shards disagree on shape: {} vs {}",
                    shard.shape,
                    sum.shape
                );
                for (acc, value) in sum.values.iter_mut().zip(&shard.values) {
                    *acc += value;
                }
            }
            Ok(sum)
        }
        SbpParallel::Split(axis) => {
            ensure!(
                axis < first.shape.num_axes(),
                "cannot concatenate {} on axis {}",
                first.shape,
                axis
            );
            let mut extent = 0;
            for shard in shards {
                ensure!(
                    shard.shape.num_axes() == first.shape.num_axes(),
                    "split shards disagree on rank"
                );
                for (i, (a, b)) in shard.shape.dims().iter().zip(first.shape.dims()).enumerate() {
                    ensure!(i == axis || a == b, "split shards disagree off axis {}", axis);
                }
                extent += shard.shape.dims()[axis];
            }
            let mut shape = first.shape.clone();
            shape.set_dim(axis, extent);
            let (outer, inner) = outer_inner(&shape, axis);
            let mut values = Vec::with_capacity(shape.elem_cnt());
            for block in 0..outer {
                for shard in shards {
                    let len = shard.shape.dims()[axis] * inner;
                    values.extend_from_slice(&shard.values[block * len..(block + 1) * len]);
                }
            }
            Ok(HostShard { shape, values })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(shape: Shape) -> HostShard {
        let values = (0..shape.elem_cnt()).map(|v| v as f32).collect();
        HostShard::new(shape, values).unwrap()
    }

    #[test]
    fn split_on_inner_axis_round_trips() {
        let x = iota(Shape::new([2, 5]));
        let shards = shard(&x, SbpParallel::Split(1), 2).unwrap();
        assert_eq!(shards[0].shape, Shape::new([2, 3]));
        assert_eq!(shards[0].values, vec![0.0, 1.0, 2.0, 5.0, 6.0, 7.0]);
        assert_eq!(shards[1].values, vec![3.0, 4.0, 8.0, 9.0]);
        assert_eq!(reconstruct(&shards, SbpParallel::Split(1)).unwrap(), x);
    }

    #[test]
    fn partial_sum_reduces_elementwise() {
        let x = iota(Shape::new([3]));
        let shards = shard(&x, SbpParallel::PartialSum, 3).unwrap();
        assert_eq!(shards[2].values, vec![0.0; 3]);
        assert_eq!(reconstruct(&shards, SbpParallel::PartialSum).unwrap(), x);
    }

    #[test]
    fn inconsistent_shard_is_rejected() {
        let err = HostShard::new(Shape::new([2, 3]), vec![0.0; 5]).unwrap_err();
        assert!(err.to_string().contains("holds 6 elements, got 5"));
    }

    #[test]
    fn split_of_scalar_is_an_error() {
        let scalar = HostShard::new(Shape::new(Vec::new()), vec![1.0]).unwrap();
        assert!(shard(&scalar, SbpParallel::Split(0), 2).is_err());
    }
}
