//! Execution of a built graph: forward values, dependency counting and the
//! backward pass.
//!
//! A backward pass runs in two phases. [`count_dependencies`] walks backward from
//! the terminal once and records, per node, how many consuming edges will deliver
//! a gradient. [`backward`] then visits nodes in reverse construction order and
//! only runs a node once all of those arrivals are in. [`Session`] strings the
//! phases together.

pub mod context;
pub mod executor;
pub mod forward;
pub mod grad_check;
pub mod session;
pub mod visitor;

pub use context::ExecutionContext;
pub use executor::{backward, BackwardReport};
pub use forward::run_forward;
pub use session::Session;
pub use visitor::{count_dependencies, reset_arrivals, DependencyCount};

#[cfg(test)]
#[path = "autograd_test.rs"]
mod tests;
