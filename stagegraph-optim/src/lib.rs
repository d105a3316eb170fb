use stagegraph_core::{NamedStore, StageGraphError};
use thiserror::Error;

pub mod sgd;

pub use sgd::{Sgd, SgdConfig};

/// Errors raised while configuring or running an optimizer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimError {
    #[error("Invalid hyperparameter {name} = {value}: {reason}")]
    InvalidHyperparameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error(transparent)]
    Core(#[from] StageGraphError),
}

/// Trait for optimization algorithms.
///
/// Optimizers update the weights of a [`NamedStore`] from the gradients a backward
/// pass accumulated into it. They run between executions, never during one.
pub trait Optimizer {
    /// Performs a single update of every weight in `store`.
    fn step(&mut self, store: &mut NamedStore) -> Result<(), OptimError>;

    /// Clears the gradients accumulated in `store`.
    ///
    /// Should be called before the next backward pass, since backward passes
    /// accumulate into the store instead of overwriting it.
    fn zero_grad(&self, store: &mut NamedStore) {
        store.zero_grad();
    }
}
