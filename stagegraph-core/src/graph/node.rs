use crate::ops::OpKind;
use std::fmt;

/// Handle of a node inside its [`Graph`](super::Graph): the node's position in
/// construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural position of a node: which stage/block repetition emitted it.
///
/// Graph-level nodes have no stage, stage-level nodes have no block, and only
/// block nodes carry a layer index (the running count of blocks across stages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub stage_index: Option<usize>,
    pub block_index: Option<usize>,
    pub layer_index: Option<usize>,
}

/// One instance of a computation in the graph.
///
/// Topology only: the node's output, gradient accumulator and arrival counters
/// live in an [`ExecutionContext`](crate::autograd::ExecutionContext), so the same
/// node can take part in any number of executions.
#[derive(Debug, Clone)]
pub struct OperationNode {
    name: String,
    kind: OpKind,
    inputs: Vec<NodeId>,
    position: Position,
}

impl OperationNode {
    pub fn new(name: impl Into<String>, kind: OpKind, inputs: Vec<NodeId>) -> Self {
        OperationNode {
            name: name.into(),
            kind,
            inputs,
            position: Position::default(),
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Resolved predecessors, in the order the operation consumes them.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn layer_index(&self) -> Option<usize> {
        self.position.layer_index
    }
}
