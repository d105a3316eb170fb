use crate::error::StageGraphError;
use crate::tensor::Tensor;

/// Rectified linear unit, `max(x, 0)`.
pub fn relu_op(x: &Tensor) -> Tensor {
    x.map(|v| if v > 0.0 { v } else { 0.0 })
}

/// Passes the gradient where the input was strictly positive.
pub fn relu_backward(x: &Tensor, grad: &Tensor) -> Result<Tensor, StageGraphError> {
    x.zip_map(grad, "relu_backward", |v, g| if v > 0.0 { g } else { 0.0 })
}

pub fn tanh_op(x: &Tensor) -> Tensor {
    x.map(f64::tanh)
}

/// Uses the forward output: `d tanh = 1 - y^2`.
pub fn tanh_backward(y: &Tensor, grad: &Tensor) -> Result<Tensor, StageGraphError> {
    y.zip_map(grad, "tanh_backward", |y, g| g * (1.0 - y * y))
}

pub fn sigmoid_op(x: &Tensor) -> Tensor {
    x.map(|v| 1.0 / (1.0 + (-v).exp()))
}

/// Uses the forward output: `d sigmoid = y (1 - y)`.
pub fn sigmoid_backward(y: &Tensor, grad: &Tensor) -> Result<Tensor, StageGraphError> {
    y.zip_map(grad, "sigmoid_backward", |y, g| g * y * (1.0 - y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::grad_check::check_operation_grad;
    use crate::ops::OpKind;
    use crate::tensor::randn_seeded;
    use approx::assert_relative_eq;

    #[test]
    fn test_relu_forward_backward() {
        let x = Tensor::new(vec![-1.0, 0.0, 2.0], vec![3]).unwrap();
        assert_eq!(relu_op(&x).data(), &[0.0, 0.0, 2.0]);
        let g = Tensor::new(vec![5.0, 5.0, 5.0], vec![3]).unwrap();
        assert_eq!(relu_backward(&x, &g).unwrap().data(), &[0.0, 0.0, 5.0]);
    }

    #[test]
    fn test_sigmoid_at_zero() {
        let y = sigmoid_op(&Tensor::scalar(0.0));
        assert_relative_eq!(y.data()[0], 0.5);
        let g = sigmoid_backward(&y, &Tensor::scalar(1.0)).unwrap();
        assert_relative_eq!(g.data()[0], 0.25);
    }

    #[test]
    fn test_tanh_and_sigmoid_grad_check() {
        let x = randn_seeded(&[2, 5], 31).unwrap();
        let g = randn_seeded(&[2, 5], 32).unwrap();
        check_operation_grad(&OpKind::Tanh, &[x.clone()], &g, 1e-6, 1e-6).unwrap();
        check_operation_grad(&OpKind::Sigmoid, &[x], &g, 1e-6, 1e-6).unwrap();
    }

    #[test]
    fn test_backward_shape_mismatch() {
        let x = Tensor::new(vec![1.0, 2.0], vec![2]).unwrap();
        let g = Tensor::new(vec![1.0], vec![1]).unwrap();
        assert!(relu_backward(&x, &g).is_err());
    }
}
