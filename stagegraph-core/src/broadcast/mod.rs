//! Forward broadcasting and its exact gradient-reduction inverse.
//!
//! Broadcasting here generalizes the NumPy rule. For an aligned dimension pair
//! `(s, t)` (source size, target size):
//! * `s == t`: the dimension is copied as is;
//! * `s == 1`: the single value repeats across the whole dimension;
//! * `t % s == 0`: the `s` values tile the dimension cyclically, `t / s` times,
//!   so target position `i` reads source position `i % s`.
//!
//! Size-1 broadcasting is the degenerate case of the tiling rule with factor `t`.
//! Several axes may tile by different factors at once. [`broadcast_reverse`] sums
//! every target element back into the source position it was read from, which
//! makes it the exact adjoint of [`broadcast_forward`].

use crate::error::StageGraphError;
use crate::tensor::utils::{calculate_strides, coord_to_index};
use crate::tensor::Tensor;
use std::cmp::max;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Left-pads `source` with 1s to the rank of `target` and checks every aligned
/// dimension pair against the tiling rule.
///
/// A target of lower rank than the source is reported with `dim == 0`.
/// A zero-sized target dimension needs a source dimension of 0 or 1.
fn aligned_source_shape(
    source: &[usize],
    target: &[usize],
) -> Result<Vec<usize>, StageGraphError> {
    let incompatible = |dim: usize| StageGraphError::IncompatibleBroadcast {
        source_shape: source.to_vec(),
        target_shape: target.to_vec(),
        dim,
    };

    if source.len() > target.len() {
        return Err(incompatible(0));
    }
    let rank_diff = target.len() - source.len();
    let mut padded = vec![1; rank_diff];
    padded.extend_from_slice(source);

    for (dim, (&s, &t)) in padded.iter().zip(target.iter()).enumerate() {
        let compatible = s == t || s == 1 || (s != 0 && t != 0 && t % s == 0);
        if !compatible {
            return Err(incompatible(dim));
        }
    }
    Ok(padded)
}

/// For every flat index of `target`, the flat index of `padded_source` it reads.
///
/// `padded_source` must already have the rank of `target` and satisfy the tiling
/// rule (see [`aligned_source_shape`]).
fn source_index_map(padded_source: &[usize], target: &[usize]) -> Vec<usize> {
    let numel: usize = target.iter().product();
    let rank = target.len();
    let source_strides = calculate_strides(padded_source);
    let mut map = Vec::with_capacity(numel);
    let mut target_coord = vec![0usize; rank];
    let mut source_coord = vec![0usize; rank];

    for _ in 0..numel {
        for d in 0..rank {
            source_coord[d] = target_coord[d] % padded_source[d];
        }
        map.push(coord_to_index(&source_coord, &source_strides));

        // Standard C-order increment of the target coordinate.
        let mut d = rank;
        while d > 0 {
            d -= 1;
            target_coord[d] += 1;
            if target_coord[d] < target[d] {
                break;
            }
            target_coord[d] = 0;
        }
    }
    map
}

/// Broadcasts `tensor` to `target_shape` using the tiling rule.
///
/// # Errors
/// `StageGraphError::IncompatibleBroadcast` when the target rank is lower than the
/// source rank or when an aligned target dimension is not a multiple of the source
/// dimension.
pub fn broadcast_forward(tensor: &Tensor, target_shape: &[usize]) -> Result<Tensor, StageGraphError> {
    if tensor.shape() == target_shape {
        return Ok(tensor.clone());
    }
    let padded = aligned_source_shape(tensor.shape(), target_shape)?;
    let map = source_index_map(&padded, target_shape);
    let source = tensor.data();

    #[cfg(feature = "parallel")]
    let data: Vec<f64> = map.par_iter().map(|&si| source[si]).collect();
    #[cfg(not(feature = "parallel"))]
    let data: Vec<f64> = map.iter().map(|&si| source[si]).collect();

    Tensor::new(data, target_shape.to_vec())
}

/// Sums `gradient` (shaped like a broadcast result) back into `original_shape`.
///
/// Element `i` along a tiled axis of size `t` lands in position `i % s` of the
/// original axis of size `s`, so every repeat copy is accumulated exactly once.
/// When the shapes are identical the gradient passes through untouched.
///
/// # Errors
/// `StageGraphError::IncompatibleBroadcast` when `original_shape` could not have
/// been broadcast to `gradient.shape()`.
pub fn broadcast_reverse(gradient: &Tensor, original_shape: &[usize]) -> Result<Tensor, StageGraphError> {
    if gradient.shape() == original_shape {
        return Ok(gradient.clone());
    }
    let padded = aligned_source_shape(original_shape, gradient.shape())?;
    let map = source_index_map(&padded, gradient.shape());
    let numel: usize = original_shape.iter().product();
    let mut out = vec![0.0; numel];
    scatter_add(&mut out, &map, gradient.data());
    Tensor::new(out, original_shape.to_vec())
}

/// `out[map[i]] += values[i]` for every `i`.
fn scatter_add(out: &mut [f64], map: &[usize], values: &[f64]) {
    for (&si, &v) in map.iter().zip(values.iter()) {
        out[si] += v;
    }
}

/// Determines the joint result shape of two operands under the tiling rule.
///
/// Dimensions are compared right to left after left-padding with 1s. Equal sizes
/// are kept; a size of 1 yields the other size; otherwise the larger size must be
/// an exact multiple of the smaller one and becomes the result size. A zero size
/// only combines with 0 or 1.
pub fn broadcast_shapes(shape_a: &[usize], shape_b: &[usize]) -> Result<Vec<usize>, StageGraphError> {
    let rank_a = shape_a.len();
    let rank_b = shape_b.len();
    let max_rank = max(rank_a, rank_b);
    let mut result_shape = vec![0; max_rank];

    for i in 0..max_rank {
        let dim_a = shape_a.get(rank_a.wrapping_sub(1 + i)).copied().unwrap_or(1);
        let dim_b = shape_b.get(rank_b.wrapping_sub(1 + i)).copied().unwrap_or(1);
        let out = max_rank - 1 - i;

        result_shape[out] = if dim_a == dim_b {
            dim_a
        } else if dim_a == 1 {
            dim_b
        } else if dim_b == 1 {
            dim_a
        } else if dim_a != 0 && dim_b != 0 && max(dim_a, dim_b) % dim_a.min(dim_b) == 0 {
            max(dim_a, dim_b)
        } else {
            return Err(StageGraphError::IncompatibleBroadcast {
                source_shape: shape_a.to_vec(),
                target_shape: shape_b.to_vec(),
                dim: out,
            });
        };
    }
    Ok(result_shape)
}

/// Index mapping for a binary elementwise operation over two broadcast operands.
///
/// `source_indices_a[i]` and `source_indices_b[i]` are the flat indices of the
/// elements of `a` and `b` that contribute to flat output index `i`. Both arrays
/// have exactly `product(result_shape)` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMapping {
    pub result_shape: Vec<usize>,
    pub shape_a: Vec<usize>,
    pub shape_b: Vec<usize>,
    pub source_indices_a: Vec<usize>,
    pub source_indices_b: Vec<usize>,
}

impl BroadcastMapping {
    /// Builds the mapping for operands of shapes `shape_a` and `shape_b`.
    pub fn new(shape_a: &[usize], shape_b: &[usize]) -> Result<Self, StageGraphError> {
        let result_shape = broadcast_shapes(shape_a, shape_b)?;
        let padded_a = aligned_source_shape(shape_a, &result_shape)?;
        let padded_b = aligned_source_shape(shape_b, &result_shape)?;
        Ok(BroadcastMapping {
            source_indices_a: source_index_map(&padded_a, &result_shape),
            source_indices_b: source_index_map(&padded_b, &result_shape),
            result_shape,
            shape_a: shape_a.to_vec(),
            shape_b: shape_b.to_vec(),
        })
    }

    /// Number of output elements.
    pub fn len(&self) -> usize {
        self.source_indices_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_indices_a.is_empty()
    }

    /// Computes `f(a[ia], b[ib])` for every output position.
    pub fn apply<F: Fn(f64, f64) -> f64>(
        &self,
        a: &Tensor,
        b: &Tensor,
        f: F,
    ) -> Result<Tensor, StageGraphError> {
        self.check_operands(a, b)?;
        let (da, db) = (a.data(), b.data());
        let data: Vec<f64> = self
            .source_indices_a
            .iter()
            .zip(self.source_indices_b.iter())
            .map(|(&ia, &ib)| f(da[ia], db[ib]))
            .collect();
        Tensor::new(data, self.result_shape.clone())
    }

    /// Sums an output-shaped tensor back into the shape of operand `a`.
    pub fn reduce_to_a(&self, grad: &Tensor) -> Result<Tensor, StageGraphError> {
        self.reduce(grad, &self.shape_a, &self.source_indices_a)
    }

    /// Sums an output-shaped tensor back into the shape of operand `b`.
    pub fn reduce_to_b(&self, grad: &Tensor) -> Result<Tensor, StageGraphError> {
        self.reduce(grad, &self.shape_b, &self.source_indices_b)
    }

    fn reduce(&self, grad: &Tensor, shape: &[usize], map: &[usize]) -> Result<Tensor, StageGraphError> {
        if grad.shape() != self.result_shape.as_slice() {
            return Err(StageGraphError::ShapeMismatch {
                expected: self.result_shape.clone(),
                actual: grad.shape().to_vec(),
                operation: "broadcast_mapping_reduce".to_string(),
            });
        }
        if shape == self.result_shape.as_slice() {
            return Ok(grad.clone());
        }
        let mut out = vec![0.0; shape.iter().product()];
        scatter_add(&mut out, map, grad.data());
        Tensor::new(out, shape.to_vec())
    }

    fn check_operands(&self, a: &Tensor, b: &Tensor) -> Result<(), StageGraphError> {
        for (t, expected) in [(a, &self.shape_a), (b, &self.shape_b)] {
            if t.shape() != expected.as_slice() {
                return Err(StageGraphError::ShapeMismatch {
                    expected: expected.clone(),
                    actual: t.shape().to_vec(),
                    operation: "broadcast_mapping_apply".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
