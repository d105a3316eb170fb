use crate::error::StageGraphError;
use crate::tensor::Tensor;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Validates `[m, k] x [k, n]` and returns `(m, k, n)`.
fn matmul_dims(a: &Tensor, b: &Tensor) -> Result<(usize, usize, usize), StageGraphError> {
    let (sa, sb) = (a.shape(), b.shape());
    if sa.len() != 2 || sb.len() != 2 || sa[1] != sb[0] {
        return Err(StageGraphError::ShapeMismatch {
            expected: sa.to_vec(),
            actual: sb.to_vec(),
            operation: "matmul".to_string(),
        });
    }
    Ok((sa[0], sa[1], sb[1]))
}

/// Plain row-major product of `lhs` (`rows x inner`) and `rhs` (`inner x cols`).
///
/// `lhs_t` / `rhs_t` read the corresponding operand as transposed storage, which
/// lets the backward pass reuse this kernel without materializing transposes.
/// Each output row is written by exactly one worker when `parallel` is enabled.
fn gemm(
    lhs: &[f64],
    lhs_t: bool,
    rhs: &[f64],
    rhs_t: bool,
    rows: usize,
    inner: usize,
    cols: usize,
) -> Vec<f64> {
    let lhs_at = |i: usize, p: usize| if lhs_t { lhs[p * rows + i] } else { lhs[i * inner + p] };
    let rhs_at = |p: usize, j: usize| if rhs_t { rhs[j * inner + p] } else { rhs[p * cols + j] };
    let mut out = vec![0.0; rows * cols];
    if cols == 0 {
        return out;
    }

    let fill_row = |(i, row): (usize, &mut [f64])| {
        for (j, cell) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for p in 0..inner {
                acc += lhs_at(i, p) * rhs_at(p, j);
            }
            *cell = acc;
        }
    };

    #[cfg(feature = "parallel")]
    out.par_chunks_mut(cols).enumerate().for_each(fill_row);
    #[cfg(not(feature = "parallel"))]
    out.chunks_mut(cols).enumerate().for_each(fill_row);

    out
}

/// 2-D matrix multiplication `[m, k] x [k, n] -> [m, n]`.
pub fn matmul_op(a: &Tensor, b: &Tensor) -> Result<Tensor, StageGraphError> {
    let (m, k, n) = matmul_dims(a, b)?;
    let data = gemm(a.data(), false, b.data(), false, m, k, n);
    Tensor::new(data, vec![m, n])
}

/// Gradients of `a x b`: `grad x b^T` for `a` and `a^T x grad` for `b`.
pub fn matmul_backward(a: &Tensor, b: &Tensor, grad: &Tensor) -> Result<Vec<Tensor>, StageGraphError> {
    let (m, k, n) = matmul_dims(a, b)?;
    if grad.shape() != [m, n] {
        return Err(StageGraphError::ShapeMismatch {
            expected: vec![m, n],
            actual: grad.shape().to_vec(),
            operation: "matmul_backward".to_string(),
        });
    }
    // grad [m, n] x b^T [n, k]
    let grad_a = gemm(grad.data(), false, b.data(), true, m, n, k);
    // a^T [k, m] x grad [m, n]
    let grad_b = gemm(a.data(), true, grad.data(), false, k, m, n);
    Ok(vec![
        Tensor::new(grad_a, vec![m, k])?,
        Tensor::new(grad_b, vec![k, n])?,
    ])
}
