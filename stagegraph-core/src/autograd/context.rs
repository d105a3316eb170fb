use crate::error::StageGraphError;
use crate::graph::{Graph, NodeId};
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Per-node mutable state of one execution.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeSlot {
    pub(crate) output: Option<Tensor>,
    pub(crate) gradient: Option<Tensor>,
    pub(crate) expected_arrivals: usize,
    pub(crate) remaining_arrivals: usize,
    pub(crate) backward_done: bool,
}

impl NodeSlot {
    fn clear_backward(&mut self) {
        self.gradient = None;
        self.expected_arrivals = 0;
        self.remaining_arrivals = 0;
        self.backward_done = false;
    }
}

/// All mutable state of executions over one [`Graph`].
///
/// The graph stays immutable; outputs, gradient accumulators, arrival counters
/// and input feeds live here, so several contexts can run over the same graph
/// without aliasing. A context is reusable: [`reset`](Self::reset) clears it
/// between executions.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub(crate) slots: Vec<NodeSlot>,
    feeds: HashMap<String, Tensor>,
    pub(crate) counted_from: Option<NodeId>,
}

impl ExecutionContext {
    pub fn new(graph: &Graph) -> Self {
        ExecutionContext {
            slots: vec![NodeSlot::default(); graph.len()],
            feeds: HashMap::new(),
            counted_from: None,
        }
    }

    /// Binds the value of the `Input` node called `name`.
    pub fn feed(&mut self, name: impl Into<String>, value: Tensor) -> &mut Self {
        self.feeds.insert(name.into(), value);
        self
    }

    pub fn feed_value(&self, name: &str) -> Option<&Tensor> {
        self.feeds.get(name)
    }

    pub fn clear_feeds(&mut self) {
        self.feeds.clear();
    }

    /// Output computed for `id` by the last forward pass.
    pub fn output(&self, id: NodeId) -> Option<&Tensor> {
        self.slots.get(id.index()).and_then(|s| s.output.as_ref())
    }

    /// Gradient accumulated into `id` by the last backward pass.
    pub fn gradient(&self, id: NodeId) -> Option<&Tensor> {
        self.slots.get(id.index()).and_then(|s| s.gradient.as_ref())
    }

    pub fn expected_arrivals(&self, id: NodeId) -> usize {
        self.slots.get(id.index()).map_or(0, |s| s.expected_arrivals)
    }

    pub fn remaining_arrivals(&self, id: NodeId) -> usize {
        self.slots.get(id.index()).map_or(0, |s| s.remaining_arrivals)
    }

    /// Whether the backward pass ran `id`'s backward computation.
    pub fn backward_done(&self, id: NodeId) -> bool {
        self.slots.get(id.index()).is_some_and(|s| s.backward_done)
    }

    /// Terminal the current dependency counts were computed from.
    pub fn counted_terminal(&self) -> Option<NodeId> {
        self.counted_from
    }

    /// Sum of expected arrivals over all nodes.
    pub fn total_expected_arrivals(&self) -> usize {
        self.slots.iter().map(|s| s.expected_arrivals).sum()
    }

    /// Clears outputs, gradients and counters. Feeds are kept.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.output = None;
            slot.clear_backward();
        }
        self.counted_from = None;
    }

    /// Clears gradients and counters but keeps forward outputs, so another backward
    /// pass can run over the same forward values.
    pub fn reset_backward(&mut self) {
        for slot in &mut self.slots {
            slot.clear_backward();
        }
        self.counted_from = None;
    }

    pub(crate) fn check_graph(&self, graph: &Graph) -> Result<(), StageGraphError> {
        if self.slots.len() != graph.len() {
            return Err(StageGraphError::InternalError(format!(
                "execution context holds {} nodes but the graph has {}",
                self.slots.len(),
                graph.len()
            )));
        }
        Ok(())
    }

    /// Output of `id`, or `MissingOutput` naming the node.
    pub(crate) fn require_output(&self, graph: &Graph, id: NodeId) -> Result<&Tensor, StageGraphError> {
        self.output(id).ok_or_else(|| StageGraphError::MissingOutput {
            node: graph.node(id).name().to_string(),
        })
    }
}
