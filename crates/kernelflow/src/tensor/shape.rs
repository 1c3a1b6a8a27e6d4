//! Tensor extents used by shape inference and physical partitioning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stores the logical dimensions of a tensor.
///
/// Unlike host tensors, inference shapes may be rank 0 (a scalar) and may contain
/// zero-sized axes; a zero-sized axis makes the whole tensor empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    /// Rank-0 shape holding exactly one element.
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn num_axes(&self) -> usize {
        self.dims.len()
    }

    /// Returns the extent of `axis`, or `None` when the axis is out of range.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Overwrites the extent of `axis`. Returns `false` when the axis is out of range.
    pub fn set_dim(&mut self, axis: usize, value: usize) -> bool {
        match self.dims.get_mut(axis) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Computes the total number of elements implied by the shape.
    pub fn elem_cnt(&self) -> usize {
        self.dims.iter().product()
    }

    /// Element count, or `None` when it does not fit in `usize`.
    pub fn checked_elem_cnt(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// True when the shape describes zero elements.
    pub fn is_empty(&self) -> bool {
        self.dims.contains(&0)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_one_element() {
        let shape = Shape::scalar();
        assert_eq!(shape.num_axes(), 0);
        assert_eq!(shape.elem_cnt(), 1);
        assert!(!shape.is_empty());
    }

    #[test]
    fn zero_extent_makes_shape_empty() {
        let shape = Shape::from([4, 0, 2]);
        assert!(shape.is_empty());
        assert_eq!(shape.to_string(), "(4, 0, 2)");
    }

    #[test]
    fn set_dim_rejects_out_of_range_axis() {
        let mut shape = Shape::from([2, 3]);
        assert!(shape.set_dim(1, 6));
        assert!(!shape.set_dim(2, 1));
        assert_eq!(shape.dims(), &[2, 6]);
        assert_eq!(Shape::from([5]).to_string(), "(5,)");
    }

    #[test]
    fn checked_elem_cnt_detects_overflow() {
        assert_eq!(Shape::from([3, 4]).checked_elem_cnt(), Some(12));
        assert_eq!(Shape::from([usize::MAX, 2]).checked_elem_cnt(), None);
        assert!(Shape::from([usize::MAX, 0, 2]).is_empty());
    }
}
