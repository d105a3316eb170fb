use super::context::ExecutionContext;
use crate::error::StageGraphError;
use crate::graph::{Graph, NodeId};
use crate::ops::OpKind;
use crate::store::{NamedKey, NamedStore};
use crate::tensor::Tensor;
use log::{debug, trace};

/// Outcome of one backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackwardReport {
    /// Nodes whose backward computation ran.
    pub visited_nodes: usize,
    /// Nodes before the terminal that the terminal does not reach.
    pub skipped_nodes: usize,
    /// True when the pass was skipped for an all-zero seed gradient.
    pub short_circuited: bool,
}

/// Propagates `grad` from `terminal` back through the graph.
///
/// Requires a forward pass, [`count_dependencies`](super::count_dependencies) from
/// the same terminal and [`reset_arrivals`](super::reset_arrivals). Nodes are
/// visited once each in reverse construction order; that order is topological, so
/// every consumer of a node has delivered its gradient before the node runs.
/// Fan-out inputs receive the sum of their consumers' gradients. Parameter
/// gradients are accumulated into `store`; all other gradients stay in `ctx`.
///
/// An all-zero `grad` returns immediately without touching any gradient.
/// On error `store` is left as it was; gradients already computed in `ctx` are
/// discarded by the next [`reset_backward`](ExecutionContext::reset_backward).
///
/// # Errors
/// * `DependenciesNotCounted` if the counts are missing or were taken from another
///   terminal.
/// * `ShapeMismatch` if `grad` is not shaped like the terminal's output.
/// * `GradientShapeMismatch` if an operation returns a gradient shaped unlike its
///   input.
pub fn backward(
    graph: &Graph,
    ctx: &mut ExecutionContext,
    store: &mut NamedStore,
    terminal: NodeId,
    grad: &Tensor,
) -> Result<BackwardReport, StageGraphError> {
    ctx.check_graph(graph)?;
    graph.check_id(terminal)?;
    if ctx.counted_from != Some(terminal) {
        return Err(StageGraphError::DependenciesNotCounted);
    }
    if ctx.slots.iter().any(|s| s.remaining_arrivals != s.expected_arrivals || s.backward_done) {
        return Err(StageGraphError::InternalError(
            "arrival counters are not armed; call reset_arrivals after counting".to_string(),
        ));
    }

    let terminal_output = ctx.require_output(graph, terminal)?;
    if terminal_output.shape() != grad.shape() {
        return Err(StageGraphError::ShapeMismatch {
            expected: terminal_output.shape().to_vec(),
            actual: grad.shape().to_vec(),
            operation: "backward seed".to_string(),
        });
    }
    if grad.is_all_zero() {
        debug!(
            "Zero seed gradient at '{}', skipping backward pass",
            graph.node(terminal).name()
        );
        return Ok(BackwardReport {
            visited_nodes: 0,
            skipped_nodes: 0,
            short_circuited: true,
        });
    }

    debug!("Backward pass from '{}'", graph.node(terminal).name());
    ctx.slots[terminal.index()].gradient = Some(grad.clone());
    let mut report = BackwardReport {
        visited_nodes: 0,
        skipped_nodes: 0,
        short_circuited: false,
    };

    // Store writes wait until the whole walk has succeeded.
    let mut parameter_leaves = Vec::new();
    for index in (0..=terminal.index()).rev() {
        let id = NodeId(index);
        let node = graph.node(id);
        if id != terminal && ctx.slots[index].expected_arrivals == 0 {
            report.skipped_nodes += 1;
            continue;
        }
        if ctx.slots[index].remaining_arrivals != 0 {
            return Err(StageGraphError::InternalError(format!(
                "node '{}' reached with {} pending arrivals",
                node.name(),
                ctx.slots[index].remaining_arrivals
            )));
        }

        let input_grads = {
            let node_grad = ctx.slots[index].gradient.as_ref().ok_or_else(|| {
                StageGraphError::InternalError(format!("node '{}' has no accumulated gradient", node.name()))
            })?;
            match node.kind() {
                OpKind::Input { .. } => Vec::new(),
                OpKind::Parameter(key) => {
                    parameter_leaves.push((key, id));
                    Vec::new()
                }
                kind => {
                    let inputs = node
                        .inputs()
                        .iter()
                        .map(|&input| ctx.require_output(graph, input))
                        .collect::<Result<Vec<&Tensor>, _>>()?;
                    let output = ctx.require_output(graph, id)?;
                    let grads = kind.backward(&inputs, output, node_grad)?;
                    if grads.len() != inputs.len() {
                        return Err(StageGraphError::InternalError(format!(
                            "operation {} at '{}' returned {} gradients for {} inputs",
                            kind.name(),
                            node.name(),
                            grads.len(),
                            inputs.len()
                        )));
                    }
                    for (i, (g, x)) in grads.iter().zip(inputs.iter()).enumerate() {
                        if g.shape() != x.shape() {
                            return Err(StageGraphError::GradientShapeMismatch {
                                node: node.name().to_string(),
                                input_index: i,
                                expected: x.shape().to_vec(),
                                actual: g.shape().to_vec(),
                            });
                        }
                    }
                    grads
                }
            }
        };

        for (&input, g) in node.inputs().iter().zip(input_grads) {
            let slot = &mut ctx.slots[input.index()];
            match slot.gradient.as_mut() {
                Some(acc) => acc.add_assign_checked(&g, "gradient accumulation")?,
                None => slot.gradient = Some(g),
            }
            slot.remaining_arrivals = slot.remaining_arrivals.checked_sub(1).ok_or_else(|| {
                StageGraphError::InternalError(format!(
                    "more gradients delivered to node {} than counted",
                    input
                ))
            })?;
        }

        ctx.slots[index].backward_done = true;
        report.visited_nodes += 1;
        trace!("backward {} '{}'", id, node.name());
    }

    flush_parameter_gradients(ctx, store, &parameter_leaves)?;
    debug!(
        "Backward pass finished: {} nodes visited, {} unreached nodes skipped",
        report.visited_nodes, report.skipped_nodes
    );
    Ok(report)
}


/// Adds the gradients of the visited parameter leaves into `store`.
///
/// Every key and shape is checked before the first write, so a failure leaves the
/// store untouched.
fn flush_parameter_gradients(
    ctx: &ExecutionContext,
    store: &mut NamedStore,
    leaves: &[(&NamedKey, NodeId)],
) -> Result<(), StageGraphError> {
    let mut pending = Vec::with_capacity(leaves.len());
    for &(key, id) in leaves {
        let grad = ctx.slots[id.index()].gradient.as_ref().ok_or_else(|| {
            StageGraphError::InternalError(format!("parameter leaf {} has no accumulated gradient", key))
        })?;
        let acc = store.gradient(key)?;
        if acc.shape() != grad.shape() {
            return Err(StageGraphError::ShapeMismatch {
                expected: acc.shape().to_vec(),
                actual: grad.shape().to_vec(),
                operation: "accumulate_gradient".to_string(),
            });
        }
        pending.push((key, grad));
    }
    for (key, grad) in pending {
        store.accumulate_gradient(key, grad)?;
    }
    Ok(())
}
