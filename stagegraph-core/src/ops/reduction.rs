use crate::broadcast::{broadcast_forward, broadcast_reverse};
use crate::error::StageGraphError;
use crate::tensor::{full, Tensor};

fn expect_scalar_grad(grad: &Tensor, operation: &str) -> Result<f64, StageGraphError> {
    if grad.numel() != 1 {
        return Err(StageGraphError::ShapeMismatch {
            expected: vec![],
            actual: grad.shape().to_vec(),
            operation: operation.to_string(),
        });
    }
    Ok(grad.data()[0])
}

/// Sums all elements into a rank-0 tensor.
pub fn sum_all_op(x: &Tensor) -> Tensor {
    Tensor::scalar(x.sum())
}

/// Spreads the scalar gradient over every input element.
pub fn sum_all_backward(x: &Tensor, grad: &Tensor) -> Result<Tensor, StageGraphError> {
    let g = expect_scalar_grad(grad, "sum_all_backward")?;
    full(x.shape(), g)
}

/// Mean of all elements as a rank-0 tensor; an empty input yields 0.
pub fn mean_op(x: &Tensor) -> Tensor {
    if x.numel() == 0 {
        return Tensor::scalar(0.0);
    }
    Tensor::scalar(x.sum() / x.numel() as f64)
}

pub fn mean_backward(x: &Tensor, grad: &Tensor) -> Result<Tensor, StageGraphError> {
    let g = expect_scalar_grad(grad, "mean_backward")?;
    let n = x.numel().max(1) as f64;
    full(x.shape(), g / n)
}

/// Broadcasts the input to `shape` with the tiling rule.
pub fn broadcast_to_op(x: &Tensor, shape: &[usize]) -> Result<Tensor, StageGraphError> {
    broadcast_forward(x, shape)
}

/// Sums the gradient back into the input's shape.
pub fn broadcast_to_backward(x: &Tensor, grad: &Tensor) -> Result<Tensor, StageGraphError> {
    broadcast_reverse(grad, x.shape())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::grad_check::check_operation_grad;
    use crate::ops::OpKind;
    use crate::tensor::randn_seeded;
    use crate::utils::testing::check_tensor_near;

    #[test]
    fn test_sum_all_and_mean() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 6.0], vec![2, 2]).unwrap();
        assert_eq!(sum_all_op(&x), Tensor::scalar(12.0));
        assert_eq!(mean_op(&x), Tensor::scalar(3.0));
        let g = mean_backward(&x, &Tensor::scalar(2.0)).unwrap();
        check_tensor_near(&g, &[2, 2], &[0.5; 4], 1e-12);
    }

    #[test]
    fn test_non_scalar_grad_rejected() {
        let x = Tensor::new(vec![1.0, 2.0], vec![2]).unwrap();
        assert!(sum_all_backward(&x, &x).is_err());
    }

    #[test]
    fn test_broadcast_to_round_trip() {
        let x = Tensor::new(vec![1.0, 2.0], vec![2]).unwrap();
        let y = broadcast_to_op(&x, &[3, 4]).unwrap();
        assert_eq!(y.shape(), &[3, 4]);
        let back = broadcast_to_backward(&x, &y).unwrap();
        // Each element appears 6 times in the [3, 4] result.
        check_tensor_near(&back, &[2], &[6.0, 12.0], 1e-12);
    }

    #[test]
    fn test_broadcast_to_grad_check() {
        let x = randn_seeded(&[2, 1, 3], 41).unwrap();
        let g = randn_seeded(&[2, 4, 6], 42).unwrap();
        check_operation_grad(&OpKind::BroadcastTo(vec![2, 4, 6]), &[x], &g, 1e-6, 1e-6).unwrap();
    }
}
