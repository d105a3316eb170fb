use crate::error::StageGraphError;
use crate::tensor::Tensor;

fn check_pair(prediction: &Tensor, target: &Tensor) -> Result<(), StageGraphError> {
    if prediction.shape() != target.shape() {
        return Err(StageGraphError::ShapeMismatch {
            expected: prediction.shape().to_vec(),
            actual: target.shape().to_vec(),
            operation: "mse_loss".to_string(),
        });
    }
    Ok(())
}

/// Mean squared error `mean((prediction - target)^2)` as a rank-0 tensor.
pub fn mse_loss_op(prediction: &Tensor, target: &Tensor) -> Result<Tensor, StageGraphError> {
    check_pair(prediction, target)?;
    let n = prediction.numel();
    if n == 0 {
        return Ok(Tensor::scalar(0.0));
    }
    let sum_sq: f64 = prediction
        .data()
        .iter()
        .zip(target.data().iter())
        .map(|(p, t)| (p - t) * (p - t))
        .sum();
    Ok(Tensor::scalar(sum_sq / n as f64))
}

/// Gradients for prediction and target: `±2 (p - t) / n * grad`.
pub fn mse_loss_backward(
    prediction: &Tensor,
    target: &Tensor,
    grad: &Tensor,
) -> Result<Vec<Tensor>, StageGraphError> {
    check_pair(prediction, target)?;
    if grad.numel() != 1 {
        return Err(StageGraphError::ShapeMismatch {
            expected: vec![],
            actual: grad.shape().to_vec(),
            operation: "mse_loss_backward".to_string(),
        });
    }
    let scale = 2.0 * grad.data()[0] / prediction.numel().max(1) as f64;
    let grad_prediction = prediction.zip_map(target, "mse_loss_backward", |p, t| scale * (p - t))?;
    let grad_target = grad_prediction.scale(-1.0);
    Ok(vec![grad_prediction, grad_target])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::grad_check::check_operation_grad;
    use crate::ops::OpKind;
    use crate::tensor::randn_seeded;
    use approx::assert_relative_eq;

    #[test]
    fn test_mse_value() {
        let p = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]).unwrap();
        let t = Tensor::new(vec![1.0, 0.0, 0.0], vec![3]).unwrap();
        let loss = mse_loss_op(&p, &t).unwrap();
        assert_eq!(loss.shape(), &[] as &[usize]);
        assert_relative_eq!(loss.data()[0], 13.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mse_shape_mismatch() {
        let p = Tensor::new(vec![1.0, 2.0], vec![2]).unwrap();
        let t = Tensor::new(vec![1.0, 2.0], vec![1, 2]).unwrap();
        assert!(mse_loss_op(&p, &t).is_err());
    }

    #[test]
    fn test_mse_grad_check() {
        let p = randn_seeded(&[4, 2], 51).unwrap();
        let t = randn_seeded(&[4, 2], 52).unwrap();
        check_operation_grad(&OpKind::MseLoss, &[p, t], &Tensor::scalar(1.5), 1e-6, 1e-6).unwrap();
    }
}
