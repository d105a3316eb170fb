use super::context::ExecutionContext;
use super::executor::{backward, BackwardReport};
use super::forward::run_forward;
use super::visitor::{count_dependencies, reset_arrivals};
use crate::error::StageGraphError;
use crate::graph::{Graph, NodeId};
use crate::store::NamedStore;
use crate::tensor::{ones_like, Tensor};

/// Drives repeated forward/backward executions of one graph.
///
/// Owns an [`ExecutionContext`] and runs the phases in the required order:
/// forward, dependency count, arrival reset, backward.
#[derive(Debug)]
pub struct Session<'g> {
    graph: &'g Graph,
    context: ExecutionContext,
}

impl<'g> Session<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Session {
            graph,
            context: ExecutionContext::new(graph),
        }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn feed(&mut self, name: impl Into<String>, value: Tensor) -> &mut Self {
        self.context.feed(name, value);
        self
    }

    pub fn run_forward(&mut self, store: &NamedStore) -> Result<(), StageGraphError> {
        run_forward(self.graph, &mut self.context, store)
    }

    /// Output of the node called `name` after a forward pass.
    pub fn output(&self, name: &str) -> Result<&Tensor, StageGraphError> {
        let id = self.lookup(name)?;
        self.context.require_output(self.graph, id)
    }

    /// Gradient accumulated into the node called `name` by the last backward pass.
    pub fn gradient(&self, name: &str) -> Result<Option<&Tensor>, StageGraphError> {
        Ok(self.context.gradient(self.lookup(name)?))
    }

    /// Backward pass from `terminal` over the current forward values. Gradients of
    /// an earlier backward pass in this session are discarded first; store
    /// gradients keep accumulating until the caller zeroes them.
    pub fn run_backward(
        &mut self,
        store: &mut NamedStore,
        terminal: NodeId,
        grad: &Tensor,
    ) -> Result<BackwardReport, StageGraphError> {
        self.context.reset_backward();
        count_dependencies(self.graph, &mut self.context, terminal)?;
        reset_arrivals(&mut self.context);
        backward(self.graph, &mut self.context, store, terminal, grad)
    }

    /// Forward pass, then backward from the scalar node `loss` seeded with 1.
    /// Returns the loss value.
    pub fn step(&mut self, store: &mut NamedStore, loss: &str) -> Result<f64, StageGraphError> {
        let terminal = self.lookup(loss)?;
        self.run_forward(store)?;
        let output = self.context.require_output(self.graph, terminal)?;
        if output.numel() != 1 {
            return Err(StageGraphError::ShapeMismatch {
                expected: vec![],
                actual: output.shape().to_vec(),
                operation: "step".to_string(),
            });
        }
        let value = output.data()[0];
        let seed = ones_like(output)?;
        self.run_backward(store, terminal, &seed)?;
        Ok(value)
    }

    fn lookup(&self, name: &str) -> Result<NodeId, StageGraphError> {
        self.graph.find(name).ok_or_else(|| StageGraphError::UnresolvedReference {
            finder: "session".to_string(),
            template: name.to_string(),
            context: "execution".to_string(),
        })
    }
}
