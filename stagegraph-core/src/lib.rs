//! Dataflow-graph engine for reverse-mode automatic differentiation.
//!
//! Graphs are expanded from a staged architecture description by
//! [`graph::GraphBuilder`], executed forward over an
//! [`autograd::ExecutionContext`], and differentiated with a counted,
//! single-pass backward walk. [`broadcast`] implements divisible-dimension
//! broadcasting and its exact gradient reduction.

pub mod autograd;
pub mod broadcast;
pub mod error;
pub mod graph;
pub mod ops;
pub mod store;
pub mod tensor;
pub mod utils;

pub use error::StageGraphError;
pub use store::{NamedKey, NamedStore};
pub use tensor::Tensor;
