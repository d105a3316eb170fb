use thiserror::Error;

/// Custom error type for the StageGraph engine.
///
/// Build-time variants (`InvalidArchitecture`, `UnresolvedReference`,
/// `DuplicateNodeName`, `InvalidNodeReference`) require a corrected architecture
/// description. Execution-time variants abort the current forward/backward cycle
/// only; the graph itself stays usable.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum StageGraphError {
    #[error("Invalid architecture: {reason}")]
    InvalidArchitecture { reason: String },

    #[error("Unresolved reference: finder '{finder}' returned no binding for template '{template}' in context {context}")]
    UnresolvedReference {
        finder: String,
        template: String,
        context: String,
    },

    #[error("Cannot broadcast shape {source_shape:?} to {target_shape:?}: incompatible dimension {dim}")]
    IncompatibleBroadcast {
        source_shape: Vec<usize>,
        target_shape: Vec<usize>,
        dim: usize,
    },

    #[error("Gradient shape mismatch at node '{node}' input {input_index}: expected {expected:?}, got {actual:?}")]
    GradientShapeMismatch {
        node: String,
        input_index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unknown parameter: {key}")]
    UnknownParameter { key: String },

    #[error("Duplicate parameter: {key}")]
    DuplicateParameter { key: String },

    #[error("Duplicate node name: {name}")]
    DuplicateNodeName { name: String },

    #[error("Node '{node}' references input {input} which is not an earlier node (graph has {len} nodes)")]
    InvalidNodeReference {
        node: String,
        input: usize,
        len: usize,
    },

    #[error("Tensor creation error: data length {data_len} does not match shape {shape:?}")]
    TensorCreationError { data_len: usize, shape: Vec<usize> },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Operation {operation} expects {expected} inputs, got {actual}")]
    ArityMismatch {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("Dependencies already counted for this execution; reset the context first")]
    DependenciesAlreadyCounted,

    #[error("Dependencies have not been counted for this execution")]
    DependenciesNotCounted,

    #[error("No feed bound for input '{name}'")]
    MissingFeed { name: String },

    #[error("Node '{node}' has no output; run the forward pass first")]
    MissingOutput { node: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}
