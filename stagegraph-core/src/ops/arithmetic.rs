//! Elementwise binary arithmetic with broadcasting.
//!
//! Operands are combined through a [`BroadcastMapping`], so they may differ in
//! shape as long as every aligned dimension pair is equal, has a 1, or divides
//! evenly. Backward passes sum the output gradient back into each operand's
//! shape through the same mapping.

use crate::broadcast::BroadcastMapping;
use crate::error::StageGraphError;
use crate::tensor::Tensor;

/// Performs element-wise addition with broadcasting.
pub fn add_op(a: &Tensor, b: &Tensor) -> Result<Tensor, StageGraphError> {
    BroadcastMapping::new(a.shape(), b.shape())?.apply(a, b, |x, y| x + y)
}

/// Gradients of `a + b`: the output gradient reduced to each operand's shape.
pub fn add_backward(a: &Tensor, b: &Tensor, grad: &Tensor) -> Result<Vec<Tensor>, StageGraphError> {
    let mapping = BroadcastMapping::new(a.shape(), b.shape())?;
    Ok(vec![mapping.reduce_to_a(grad)?, mapping.reduce_to_b(grad)?])
}

/// Performs element-wise subtraction with broadcasting.
pub fn sub_op(a: &Tensor, b: &Tensor) -> Result<Tensor, StageGraphError> {
    BroadcastMapping::new(a.shape(), b.shape())?.apply(a, b, |x, y| x - y)
}

/// Gradients of `a - b`.
pub fn sub_backward(a: &Tensor, b: &Tensor, grad: &Tensor) -> Result<Vec<Tensor>, StageGraphError> {
    let mapping = BroadcastMapping::new(a.shape(), b.shape())?;
    let grad_b = mapping.reduce_to_b(&grad.scale(-1.0))?;
    Ok(vec![mapping.reduce_to_a(grad)?, grad_b])
}

/// Performs element-wise multiplication with broadcasting.
pub fn mul_op(a: &Tensor, b: &Tensor) -> Result<Tensor, StageGraphError> {
    BroadcastMapping::new(a.shape(), b.shape())?.apply(a, b, |x, y| x * y)
}

/// Gradients of `a * b`: `grad * b` for `a`, `grad * a` for `b`, each reduced.
pub fn mul_backward(a: &Tensor, b: &Tensor, grad: &Tensor) -> Result<Vec<Tensor>, StageGraphError> {
    let mapping = BroadcastMapping::new(a.shape(), b.shape())?;
    let (da, db, dg) = (a.data(), b.data(), grad.data());
    if dg.len() != mapping.len() {
        return Err(StageGraphError::ShapeMismatch {
            expected: mapping.result_shape.clone(),
            actual: grad.shape().to_vec(),
            operation: "mul_backward".to_string(),
        });
    }

    let mut grad_a_full = Vec::with_capacity(mapping.len());
    let mut grad_b_full = Vec::with_capacity(mapping.len());
    for (i, (&ia, &ib)) in mapping
        .source_indices_a
        .iter()
        .zip(mapping.source_indices_b.iter())
        .enumerate()
    {
        grad_a_full.push(dg[i] * db[ib]);
        grad_b_full.push(dg[i] * da[ia]);
    }
    let grad_a_full = Tensor::new(grad_a_full, mapping.result_shape.clone())?;
    let grad_b_full = Tensor::new(grad_b_full, mapping.result_shape.clone())?;
    Ok(vec![
        mapping.reduce_to_a(&grad_a_full)?,
        mapping.reduce_to_b(&grad_b_full)?,
    ])
}

/// Multiplies every element by a constant.
pub fn scale_op(a: &Tensor, factor: f64) -> Tensor {
    a.scale(factor)
}
