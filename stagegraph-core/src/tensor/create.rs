// src/tensor/create.rs

use crate::error::StageGraphError;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

/// Creates a new tensor filled with zeros with the specified shape.
pub fn zeros(shape: &[usize]) -> Result<Tensor, StageGraphError> {
    full(shape, 0.0)
}

/// Creates a new tensor filled with ones with the specified shape.
pub fn ones(shape: &[usize]) -> Result<Tensor, StageGraphError> {
    full(shape, 1.0)
}

/// Creates a new tensor filled with a specific value with the specified shape.
pub fn full(shape: &[usize], value: f64) -> Result<Tensor, StageGraphError> {
    let numel = shape.iter().product();
    Tensor::new(vec![value; numel], shape.to_vec())
}

/// Creates a new tensor filled with zeros, having the same shape as the input tensor.
pub fn zeros_like(tensor: &Tensor) -> Result<Tensor, StageGraphError> {
    zeros(tensor.shape())
}

/// Creates a new tensor filled with ones, having the same shape as the input tensor.
pub fn ones_like(tensor: &Tensor) -> Result<Tensor, StageGraphError> {
    ones(tensor.shape())
}

/// Creates a tensor with values drawn uniformly from `[0, 1)`.
pub fn rand(shape: &[usize]) -> Result<Tensor, StageGraphError> {
    let numel = shape.iter().product();
    let mut rng = rand::thread_rng();
    let data: Vec<f64> = (0..numel).map(|_| rng.gen::<f64>()).collect();
    Tensor::new(data, shape.to_vec())
}

/// Creates a tensor with values drawn from the standard normal distribution.
pub fn randn(shape: &[usize]) -> Result<Tensor, StageGraphError> {
    let mut rng = rand::thread_rng();
    randn_with(shape, &mut rng)
}

/// Same as [`randn`] but reproducible: the values depend only on `seed`.
pub fn randn_seeded(shape: &[usize], seed: u64) -> Result<Tensor, StageGraphError> {
    let mut rng = StdRng::seed_from_u64(seed);
    randn_with(shape, &mut rng)
}

fn randn_with<R: Rng>(shape: &[usize], rng: &mut R) -> Result<Tensor, StageGraphError> {
    let numel = shape.iter().product();
    let data: Vec<f64> = (0..numel).map(|_| StandardNormal.sample(rng)).collect();
    Tensor::new(data, shape.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_and_ones() {
        let z = zeros(&[2, 3]).unwrap();
        assert_eq!(z.shape(), &[2, 3]);
        assert!(z.is_all_zero());

        let o = ones(&[4]).unwrap();
        assert_eq!(o.data(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_zero_dimension_gives_empty_buffer() {
        let t = full(&[3, 0, 2], 7.0).unwrap();
        assert_eq!(t.numel(), 0);
        assert!(t.data().is_empty());
    }

    #[test]
    fn test_like_constructors_follow_shape() {
        let base = full(&[2, 2], 3.0).unwrap();
        assert_eq!(zeros_like(&base).unwrap().shape(), &[2, 2]);
        assert_eq!(ones_like(&base).unwrap().sum(), 4.0);
    }

    #[test]
    fn test_rand_range() {
        let t = rand(&[64]).unwrap();
        assert!(t.data().iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_randn_seeded_is_reproducible() {
        let a = randn_seeded(&[3, 3], 42).unwrap();
        let b = randn_seeded(&[3, 3], 42).unwrap();
        let c = randn_seeded(&[3, 3], 43).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(randn(&[5]).unwrap().numel(), 5);
    }
}
