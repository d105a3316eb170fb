use crate::error::StageGraphError;
use crate::ops::OpKind;
use crate::tensor::Tensor;
use approx::relative_eq;
use thiserror::Error;

/// Error type specifically for gradient checking failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error("Gradient check failed for input {input_index}, element {element_index}: analytical {analytical_grad} != numerical {numerical_grad}")]
    GradientMismatch {
        input_index: usize,
        element_index: usize,
        analytical_grad: f64,
        numerical_grad: f64,
    },
    #[error("Backward returned {actual} gradients for {expected} inputs")]
    GradientCount { expected: usize, actual: usize },
    #[error("Numerical gradient is not finite for input {input_index}, element {element_index}")]
    NumericalGradNotFinite { input_index: usize, element_index: usize },
    #[error("Tensor error during gradient check: {0}")]
    TensorError(#[from] StageGraphError),
}

/// Weighted loss `sum(output * output_grad)`, whose derivative with respect to the
/// output is exactly `output_grad`.
fn weighted_loss(output: &Tensor, output_grad: &Tensor) -> Result<f64, GradCheckError> {
    Ok(output
        .zip_map(output_grad, "grad_check loss", |o, g| o * g)?
        .sum())
}

/// Checks analytical gradients against central finite differences.
///
/// `backward` receives the inputs and `output_grad` and must return one gradient
/// per input. Each element of each input is perturbed by `±epsilon`; the numeric
/// and analytic values must agree within `tolerance`, absolute or relative.
pub fn check_grad<F, B>(
    forward: F,
    backward: B,
    inputs: &[Tensor],
    output_grad: &Tensor,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), GradCheckError>
where
    F: Fn(&[Tensor]) -> Result<Tensor, StageGraphError>,
    B: Fn(&[Tensor], &Tensor) -> Result<Vec<Tensor>, StageGraphError>,
{
    let analytical = backward(inputs, output_grad)?;
    if analytical.len() != inputs.len() {
        return Err(GradCheckError::GradientCount {
            expected: inputs.len(),
            actual: analytical.len(),
        });
    }

    for (i, input) in inputs.iter().enumerate() {
        if analytical[i].shape() != input.shape() {
            return Err(StageGraphError::GradientShapeMismatch {
                node: "grad_check".to_string(),
                input_index: i,
                expected: input.shape().to_vec(),
                actual: analytical[i].shape().to_vec(),
            }
            .into());
        }
        for elem in 0..input.numel() {
            let mut perturbed = inputs.to_vec();
            perturbed[i].data_mut()[elem] = input.data()[elem] + epsilon;
            let loss_plus = weighted_loss(&forward(&perturbed)?, output_grad)?;
            perturbed[i].data_mut()[elem] = input.data()[elem] - epsilon;
            let loss_minus = weighted_loss(&forward(&perturbed)?, output_grad)?;

            let numerical_grad = (loss_plus - loss_minus) / (2.0 * epsilon);
            if !numerical_grad.is_finite() {
                return Err(GradCheckError::NumericalGradNotFinite {
                    input_index: i,
                    element_index: elem,
                });
            }
            let analytical_grad = analytical[i].data()[elem];
            if !relative_eq!(analytical_grad, numerical_grad, epsilon = tolerance, max_relative = tolerance) {
                return Err(GradCheckError::GradientMismatch {
                    input_index: i,
                    element_index: elem,
                    analytical_grad,
                    numerical_grad,
                });
            }
        }
    }
    Ok(())
}

/// [`check_grad`] for a built-in or custom operation kind.
pub fn check_operation_grad(
    kind: &OpKind,
    inputs: &[Tensor],
    output_grad: &Tensor,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    check_grad(
        |xs| kind.forward(&xs.iter().collect::<Vec<_>>()),
        |xs, grad| {
            let refs: Vec<&Tensor> = xs.iter().collect();
            let output = kind.forward(&refs)?;
            kind.backward(&refs, &output, grad)
        },
        inputs,
        output_grad,
        epsilon,
        tolerance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::randn_seeded;

    #[test]
    fn test_detects_wrong_backward() {
        let x = randn_seeded(&[3], 7).unwrap();
        let g = randn_seeded(&[3], 8).unwrap();
        let result = check_grad(
            |xs| Ok(xs[0].map(|v| v * v)),
            |xs, grad| Ok(vec![xs[0].zip_map(grad, "wrong", |v, g| v * g)?]),
            &[x],
            &g,
            1e-6,
            1e-6,
        );
        assert!(matches!(result, Err(GradCheckError::GradientMismatch { input_index: 0, .. })));
    }

    #[test]
    fn test_accepts_correct_backward() {
        let x = randn_seeded(&[2, 2], 9).unwrap();
        let g = randn_seeded(&[2, 2], 10).unwrap();
        check_grad(
            |xs| Ok(xs[0].map(|v| v * v)),
            |xs, grad| Ok(vec![xs[0].zip_map(grad, "square", |v, g| 2.0 * v * g)?]),
            &[x],
            &g,
            1e-6,
            1e-6,
        )
        .unwrap();
    }

    #[test]
    fn test_wrong_gradient_count() {
        let x = randn_seeded(&[2], 11).unwrap();
        let result = check_grad(|xs| Ok(xs[0].clone()), |_, _| Ok(vec![]), &[x.clone()], &x, 1e-6, 1e-6);
        assert_eq!(
            result,
            Err(GradCheckError::GradientCount {
                expected: 1,
                actual: 0
            })
        );
    }
}
