use crate::tensor::Tensor;

/// Checks if a tensor matches an expected shape and data within tolerance.
/// Panics if shapes differ or data differs significantly.
pub fn check_tensor_near(actual: &Tensor, expected_shape: &[usize], expected_data: &[f64], tolerance: f64) {
    assert_eq!(actual.shape(), expected_shape, "Shape mismatch");
    assert_eq!(
        actual.numel(),
        expected_data.len(),
        "Data length mismatch"
    );

    for (i, (a, e)) in actual.data().iter().zip(expected_data.iter()).enumerate() {
        let diff = (a - e).abs();
        if diff > tolerance {
            panic!(
                "Data mismatch at index {}: actual={:?}, expected={:?}, diff={:?}, tolerance={:?}",
                i, a, e, diff, tolerance
            );
        }
    }
}
