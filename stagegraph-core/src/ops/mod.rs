//! Operation kinds and their forward/backward kernels.
//!
//! Every operation satisfies the same contract: `forward` maps an ordered list of
//! input tensors to one output, and `backward` maps the gradient of that output to
//! one gradient per input, in input order and with each input's shape. Values a
//! backward pass needs (inputs, output) are handed back to it explicitly by the
//! executor rather than cached inside the operation, so one operation instance can
//! serve any number of independent executions.

use crate::error::StageGraphError;
use crate::store::NamedKey;
use crate::tensor::Tensor;
use std::fmt::Debug;
use std::sync::Arc;

pub mod activation;
pub mod arithmetic;
pub mod linalg;
pub mod loss;
pub mod reduction;

pub use activation::{relu_backward, relu_op, sigmoid_backward, sigmoid_op, tanh_backward, tanh_op};
pub use arithmetic::{add_backward, add_op, mul_backward, mul_op, scale_op, sub_backward, sub_op};
pub use linalg::{matmul_backward, matmul_op};
pub use loss::{mse_loss_backward, mse_loss_op};
pub use reduction::{broadcast_to_backward, broadcast_to_op, mean_backward, mean_op, sum_all_backward, sum_all_op};

/// Contract for operations supplied from outside the built-in set.
///
/// Implementations must be stateless with respect to executions: anything the
/// backward pass needs is passed in through `inputs` and `output`.
pub trait Operation: Debug + Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Number of inputs the operation expects, if fixed.
    fn arity(&self) -> Option<usize> {
        None
    }

    /// Computes the output from the inputs.
    fn forward(&self, inputs: &[&Tensor]) -> Result<Tensor, StageGraphError>;

    /// Computes one gradient per input from the gradient of the output.
    ///
    /// The returned `Vec` must have `inputs.len()` entries, each shaped like the
    /// corresponding input.
    fn backward(
        &self,
        inputs: &[&Tensor],
        output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Vec<Tensor>, StageGraphError>;
}

/// Closed set of operation kinds a graph node can carry.
///
/// `Input` and `Parameter` are leaves: their values come from the execution feeds
/// and the [`NamedStore`](crate::store::NamedStore) respectively, and the executor
/// handles them directly. All other kinds dispatch to a kernel in this module.
#[derive(Debug, Clone)]
pub enum OpKind {
    /// Per-execution value bound by name on the execution context.
    Input { name: String },
    /// Learnable weight read from the store; its gradient lands in the store.
    Parameter(NamedKey),
    Identity,
    Add,
    Sub,
    Mul,
    /// 2-D matrix product `[m, k] x [k, n] -> [m, n]`.
    MatMul,
    Relu,
    Tanh,
    Sigmoid,
    Scale(f64),
    /// Broadcast the single input to a fixed shape using the tiling rule.
    BroadcastTo(Vec<usize>),
    SumAll,
    Mean,
    /// Mean squared error between a prediction and a target, as a scalar.
    MseLoss,
    Custom(Arc<dyn Operation>),
}

impl OpKind {
    pub fn name(&self) -> &str {
        match self {
            OpKind::Input { .. } => "input",
            OpKind::Parameter(_) => "parameter",
            OpKind::Identity => "identity",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::MatMul => "matmul",
            OpKind::Relu => "relu",
            OpKind::Tanh => "tanh",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Scale(_) => "scale",
            OpKind::BroadcastTo(_) => "broadcast_to",
            OpKind::SumAll => "sum_all",
            OpKind::Mean => "mean",
            OpKind::MseLoss => "mse_loss",
            OpKind::Custom(op) => op.name(),
        }
    }

    /// True for kinds whose value does not come from other nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(self, OpKind::Input { .. } | OpKind::Parameter(_))
    }

    /// Number of inputs the kind expects, if fixed.
    pub fn arity(&self) -> Option<usize> {
        match self {
            OpKind::Input { .. } | OpKind::Parameter(_) => Some(0),
            OpKind::Identity
            | OpKind::Relu
            | OpKind::Tanh
            | OpKind::Sigmoid
            | OpKind::Scale(_)
            | OpKind::BroadcastTo(_)
            | OpKind::SumAll
            | OpKind::Mean => Some(1),
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::MatMul | OpKind::MseLoss => Some(2),
            OpKind::Custom(op) => op.arity(),
        }
    }

    /// Checks `count` against [`OpKind::arity`].
    pub fn check_arity(&self, count: usize) -> Result<(), StageGraphError> {
        match self.arity() {
            Some(expected) if expected != count => Err(StageGraphError::ArityMismatch {
                operation: self.name().to_string(),
                expected,
                actual: count,
            }),
            _ => Ok(()),
        }
    }

    /// Runs the forward kernel of a non-leaf kind.
    pub fn forward(&self, inputs: &[&Tensor]) -> Result<Tensor, StageGraphError> {
        self.check_arity(inputs.len())?;
        match self {
            OpKind::Input { .. } | OpKind::Parameter(_) => Err(leaf_dispatch(self)),
            OpKind::Identity => Ok(inputs[0].clone()),
            OpKind::Add => add_op(inputs[0], inputs[1]),
            OpKind::Sub => sub_op(inputs[0], inputs[1]),
            OpKind::Mul => mul_op(inputs[0], inputs[1]),
            OpKind::MatMul => matmul_op(inputs[0], inputs[1]),
            OpKind::Relu => Ok(relu_op(inputs[0])),
            OpKind::Tanh => Ok(tanh_op(inputs[0])),
            OpKind::Sigmoid => Ok(sigmoid_op(inputs[0])),
            OpKind::Scale(factor) => Ok(scale_op(inputs[0], *factor)),
            OpKind::BroadcastTo(shape) => broadcast_to_op(inputs[0], shape),
            OpKind::SumAll => Ok(sum_all_op(inputs[0])),
            OpKind::Mean => Ok(mean_op(inputs[0])),
            OpKind::MseLoss => mse_loss_op(inputs[0], inputs[1]),
            OpKind::Custom(op) => op.forward(inputs),
        }
    }

    /// Runs the backward kernel of a non-leaf kind.
    pub fn backward(
        &self,
        inputs: &[&Tensor],
        output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Vec<Tensor>, StageGraphError> {
        self.check_arity(inputs.len())?;
        match self {
            OpKind::Input { .. } | OpKind::Parameter(_) => Err(leaf_dispatch(self)),
            OpKind::Identity => Ok(vec![grad_output.clone()]),
            OpKind::Add => add_backward(inputs[0], inputs[1], grad_output),
            OpKind::Sub => sub_backward(inputs[0], inputs[1], grad_output),
            OpKind::Mul => mul_backward(inputs[0], inputs[1], grad_output),
            OpKind::MatMul => matmul_backward(inputs[0], inputs[1], grad_output),
            OpKind::Relu => relu_backward(inputs[0], grad_output).map(|g| vec![g]),
            OpKind::Tanh => tanh_backward(output, grad_output).map(|g| vec![g]),
            OpKind::Sigmoid => sigmoid_backward(output, grad_output).map(|g| vec![g]),
            OpKind::Scale(factor) => Ok(vec![scale_op(grad_output, *factor)]),
            OpKind::BroadcastTo(_) => broadcast_to_backward(inputs[0], grad_output).map(|g| vec![g]),
            OpKind::SumAll => sum_all_backward(inputs[0], grad_output).map(|g| vec![g]),
            OpKind::Mean => mean_backward(inputs[0], grad_output).map(|g| vec![g]),
            OpKind::MseLoss => mse_loss_backward(inputs[0], inputs[1], grad_output),
            OpKind::Custom(op) => op.backward(inputs, output, grad_output),
        }
    }
}

fn leaf_dispatch(kind: &OpKind) -> StageGraphError {
    StageGraphError::InternalError(format!(
        "leaf kind '{}' has no kernel; its value is bound by the executor",
        kind.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::ones;

    #[derive(Debug)]
    struct Double;

    impl Operation for Double {
        fn name(&self) -> &str {
            "double"
        }

        fn arity(&self) -> Option<usize> {
            Some(1)
        }

        fn forward(&self, inputs: &[&Tensor]) -> Result<Tensor, StageGraphError> {
            Ok(inputs[0].scale(2.0))
        }

        fn backward(
            &self,
            _inputs: &[&Tensor],
            _output: &Tensor,
            grad_output: &Tensor,
        ) -> Result<Vec<Tensor>, StageGraphError> {
            Ok(vec![grad_output.scale(2.0)])
        }
    }

    #[test]
    fn test_arity_is_checked() {
        let x = ones(&[2]).unwrap();
        let err = OpKind::Add.forward(&[&x]).unwrap_err();
        assert_eq!(
            err,
            StageGraphError::ArityMismatch {
                operation: "add".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_leaf_kinds_have_no_kernel() {
        let kind = OpKind::Input { name: "x".to_string() };
        assert!(kind.is_leaf());
        assert!(matches!(kind.forward(&[]), Err(StageGraphError::InternalError(_))));
    }

    #[test]
    fn test_custom_operation_dispatch() {
        let kind = OpKind::Custom(Arc::new(Double));
        let x = ones(&[3]).unwrap();
        let y = kind.forward(&[&x]).unwrap();
        assert_eq!(y.data(), &[2.0, 2.0, 2.0]);
        let g = kind.backward(&[&x], &y, &ones(&[3]).unwrap()).unwrap();
        assert_eq!(g[0].data(), &[2.0, 2.0, 2.0]);
        assert_eq!(kind.name(), "double");
        assert!(kind.check_arity(2).is_err());
    }

    #[test]
    fn test_identity_and_scale() {
        let x = Tensor::new(vec![1.0, -1.0], vec![2]).unwrap();
        assert_eq!(OpKind::Identity.forward(&[&x]).unwrap(), x);
        let y = OpKind::Scale(3.0).forward(&[&x]).unwrap();
        assert_eq!(y.data(), &[3.0, -3.0]);
        let g = OpKind::Scale(3.0).backward(&[&x], &y, &ones(&[2]).unwrap()).unwrap();
        assert_eq!(g[0].data(), &[3.0, 3.0]);
    }
}
