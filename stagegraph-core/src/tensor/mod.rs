// src/tensor/mod.rs

use crate::error::StageGraphError;
use std::fmt;

pub mod create;
pub mod utils;

pub use create::{full, ones, ones_like, rand, randn, randn_seeded, zeros, zeros_like};

/// Represents a multi-dimensional array (tensor) of `f64` values.
///
/// A `Tensor` is a plain value: an ordered shape plus a flat, row-major data buffer
/// whose length is always the product of the shape. It has no knowledge of the
/// computation graph. Graph execution state (outputs, gradient accumulators) owns
/// its tensors exclusively, so cloning a `Tensor` always clones its buffer.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    /// Creates a new Tensor from row-major data and a shape.
    ///
    /// # Errors
    /// Returns `StageGraphError::TensorCreationError` if `data.len()` is not the
    /// product of `shape`. A shape containing a zero dimension requires empty data.
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Result<Self, StageGraphError> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(StageGraphError::TensorCreationError {
                data_len: data.len(),
                shape,
            });
        }
        Ok(Tensor { shape, data })
    }

    /// Creates a rank-0 tensor holding a single value.
    pub fn scalar(value: f64) -> Self {
        Tensor {
            shape: vec![],
            data: vec![value],
        }
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the number of elements in the tensor.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns the flat row-major data.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Returns the flat row-major data mutably. The shape cannot change through
    /// this accessor, so the length invariant holds.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consumes the tensor and returns its buffer.
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Reads a single element by multi-dimensional coordinates.
    pub fn at(&self, coords: &[usize]) -> Result<f64, StageGraphError> {
        if coords.len() != self.shape.len()
            || coords.iter().zip(self.shape.iter()).any(|(&c, &d)| c >= d)
        {
            return Err(StageGraphError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: coords.to_vec(),
                operation: "at".to_string(),
            });
        }
        let strides = utils::calculate_strides(&self.shape);
        Ok(self.data[utils::coord_to_index(coords, &strides)])
    }

    /// Returns a tensor with the same data and a new shape of equal element count.
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Tensor, StageGraphError> {
        let numel: usize = shape.iter().product();
        if numel != self.numel() {
            return Err(StageGraphError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: shape,
                operation: "reshape".to_string(),
            });
        }
        Ok(Tensor {
            shape,
            data: self.data.clone(),
        })
    }

    /// True if every element is exactly zero (an empty tensor counts as zero).
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Applies `f` to every element, returning a new tensor of the same shape.
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combines two tensors of identical shape element by element.
    pub fn zip_map<F: Fn(f64, f64) -> f64>(
        &self,
        other: &Tensor,
        operation: &str,
        f: F,
    ) -> Result<Tensor, StageGraphError> {
        self.check_same_shape(other, operation)?;
        Ok(Tensor {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f64) -> Tensor {
        self.map(|v| v * factor)
    }

    /// Adds `other` into `self` element by element.
    ///
    /// This is the accumulation primitive used for gradient slots. Shapes must match
    /// exactly; nothing is truncated or padded.
    pub fn add_assign_checked(
        &mut self,
        other: &Tensor,
        operation: &str,
    ) -> Result<(), StageGraphError> {
        self.check_same_shape(other, operation)?;
        self.data
            .iter_mut()
            .zip(other.data.iter())
            .for_each(|(a, &b)| *a += b);
        Ok(())
    }

    /// Sets every element to zero in place.
    pub fn fill_zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    fn check_same_shape(&self, other: &Tensor, operation: &str) -> Result<(), StageGraphError> {
        if self.shape != other.shape {
            return Err(StageGraphError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        write!(f, "Tensor(shape={:?}, data=", self.shape)?;
        if self.data.len() > PREVIEW {
            write!(f, "{:?}...", &self.data[..PREVIEW])?;
        } else {
            write!(f, "{:?}", self.data)?;
        }
        write!(f, ")")
    }
}
