//! Computation graph topology and its declarative construction.
//!
//! A [`Graph`] is an arena of [`OperationNode`]s in construction order. Inputs are
//! stored as [`NodeId`] handles that must point at earlier nodes, which makes
//! every graph acyclic by construction and makes reverse construction order a
//! valid order for the backward pass.

use crate::error::StageGraphError;
use crate::ops::OpKind;
use crate::store::{NamedKey, NamedStore};
use crate::tensor::Tensor;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub mod arch;
pub mod builder;
pub mod finder;
pub mod node;
pub mod template;

pub use arch::{ArchSpec, StageSpec};
pub use builder::{GraphBuilder, Scope};
pub use finder::{Binding, FinderContext, FinderRegistry, FinderScope, OperationFinder};
pub use node::{NodeId, OperationNode, Position};
pub use template::{Dim, NameTemplate, OpTemplate, ParamTemplate};

/// Ordered set of operation nodes with name and parameter indexes.
///
/// Produced once per architecture configuration and immutable during execution,
/// so it can be shared by any number of execution contexts.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<OperationNode>,
    by_name: HashMap<String, NodeId>,
    parameter_nodes: HashMap<NamedKey, NodeId>,
    declared_parameters: BTreeMap<NamedKey, Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node.
    ///
    /// # Errors
    /// * `DuplicateNodeName` if the name is taken.
    /// * `InvalidNodeReference` if an input is not an already inserted node.
    /// * `ArityMismatch` if the input count does not fit the operation kind.
    pub fn add_node(&mut self, node: OperationNode) -> Result<NodeId, StageGraphError> {
        if self.by_name.contains_key(node.name()) {
            return Err(StageGraphError::DuplicateNodeName {
                name: node.name().to_string(),
            });
        }
        let len = self.nodes.len();
        if let Some(bad) = node.inputs().iter().find(|id| id.0 >= len) {
            return Err(StageGraphError::InvalidNodeReference {
                node: node.name().to_string(),
                input: bad.0,
                len,
            });
        }
        node.kind().check_arity(node.inputs().len())?;

        let id = NodeId(len);
        self.by_name.insert(node.name().to_string(), id);
        if let OpKind::Parameter(key) = node.kind() {
            self.parameter_nodes.insert(key.clone(), id);
        }
        self.nodes.push(node);
        Ok(id)
    }

    /// Adds an `Input` leaf that reads the feed called `name`.
    pub fn add_input(&mut self, name: &str) -> Result<NodeId, StageGraphError> {
        self.add_node(OperationNode::new(
            name,
            OpKind::Input {
                name: name.to_string(),
            },
            vec![],
        ))
    }

    /// Returns the `Parameter` leaf for `key`, creating it on first use.
    ///
    /// Every consumer of the same parameter shares one node, so the parameter's
    /// gradient is the sum over all of them.
    pub fn parameter(&mut self, key: &NamedKey) -> Result<NodeId, StageGraphError> {
        if let Some(&id) = self.parameter_nodes.get(key) {
            return Ok(id);
        }
        self.add_node(OperationNode::new(
            format!("param:{}", key.dotted()),
            OpKind::Parameter(key.clone()),
            vec![],
        ))
    }

    /// Records the expected shape of a parameter.
    ///
    /// # Errors
    /// `InvalidArchitecture` if the key was already declared with another shape.
    pub fn declare_parameter(&mut self, key: NamedKey, shape: Vec<usize>) -> Result<(), StageGraphError> {
        match self.declared_parameters.get(&key) {
            Some(existing) if *existing != shape => Err(StageGraphError::InvalidArchitecture {
                reason: format!(
                    "parameter {} declared with shape {:?} and {:?}",
                    key, existing, shape
                ),
            }),
            Some(_) => Ok(()),
            None => {
                self.declared_parameters.insert(key, shape);
                Ok(())
            }
        }
    }

    pub fn declared_parameters(&self) -> &BTreeMap<NamedKey, Vec<usize>> {
        &self.declared_parameters
    }

    /// Builds a store holding one weight per declared parameter, created by `init`.
    pub fn init_store<F>(&self, mut init: F) -> Result<NamedStore, StageGraphError>
    where
        F: FnMut(&NamedKey, &[usize]) -> Result<Tensor, StageGraphError>,
    {
        let mut store = NamedStore::new();
        for (key, shape) in &self.declared_parameters {
            let weight = init(key, shape)?;
            if weight.shape() != shape.as_slice() {
                return Err(StageGraphError::InvalidArchitecture {
                    reason: format!(
                        "initializer produced shape {:?} for {} declared as {:?}",
                        weight.shape(),
                        key,
                        shape
                    ),
                });
            }
            store.insert(key.clone(), weight)?;
        }
        debug!("Initialized store with {} parameters", store.len());
        Ok(store)
    }

    /// Checks that `store` holds every declared parameter with the declared shape.
    pub fn check_store(&self, store: &NamedStore) -> Result<(), StageGraphError> {
        for (key, shape) in &self.declared_parameters {
            let weight = store.weight(key)?;
            if weight.shape() != shape.as_slice() {
                return Err(StageGraphError::InvalidArchitecture {
                    reason: format!(
                        "parameter {} has rank {} shape {:?}, declared rank {} shape {:?}",
                        key,
                        weight.rank(),
                        weight.shape(),
                        shape.len(),
                        shape
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node behind `id`.
    ///
    /// Ids are only handed out by this graph, so an unknown id is a caller bug that
    /// surfaces as a panic, like slice indexing.
    pub fn node(&self, id: NodeId) -> &OperationNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &OperationNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Validates an id coming from outside the graph.
    pub fn check_id(&self, id: NodeId) -> Result<(), StageGraphError> {
        if id.0 >= self.nodes.len() {
            return Err(StageGraphError::InvalidNodeReference {
                node: "<external>".to_string(),
                input: id.0,
                len: self.nodes.len(),
            });
        }
        Ok(())
    }

    /// Looks a node up by its full name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Parameter leaf of `key`, if any node consumes it.
    pub fn parameter_node(&self, key: &NamedKey) -> Option<NodeId> {
        self.parameter_nodes.get(key).copied()
    }

    /// Total number of input references across all nodes.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.inputs().len()).sum()
    }

    /// Nodes that consume `id`, once per consuming edge.
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .flat_map(|(cid, n)| n.inputs().iter().filter(move |&&i| i == id).map(move |_| cid))
            .collect()
    }

    /// Nodes emitted for stage `stage`, in construction order.
    pub fn stage_nodes(&self, stage: usize) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.position().stage_index == Some(stage))
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes emitted for layer `layer`, in construction order.
    pub fn layer_nodes(&self, layer: usize) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.layer_index() == Some(layer))
            .map(|(id, _)| id)
            .collect()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, node) in self.nodes() {
            write!(f, "{} {} [{}]", id, node.name(), node.kind().name())?;
            if let Some(layer) = node.layer_index() {
                write!(f, " L{}", layer)?;
            }
            if !node.inputs().is_empty() {
                let inputs: Vec<String> = node.inputs().iter().map(|i| i.to_string()).collect();
                write!(f, " <- {}", inputs.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
