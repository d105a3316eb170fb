use super::context::ExecutionContext;
use crate::error::StageGraphError;
use crate::graph::{Graph, NodeId};
use log::debug;

/// Totals of one dependency count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyCount {
    /// Nodes reachable backward from the terminal, the terminal included.
    pub reachable_nodes: usize,
    /// Input edges among those nodes. Equal to the sum of expected arrivals.
    pub edges: usize,
}

/// Counts, for every node reachable backward from `terminal`, how many consuming
/// edges will deliver a gradient to it.
///
/// Each reachable node's inputs are expanded exactly once, so a node consumed by
/// `k` edges ends with `k` expected arrivals no matter how many paths lead to it.
/// No numeric work is done.
///
/// # Errors
/// `DependenciesAlreadyCounted` if `ctx` still holds counts from an earlier call;
/// call [`ExecutionContext::reset_backward`] first.
pub fn count_dependencies(
    graph: &Graph,
    ctx: &mut ExecutionContext,
    terminal: NodeId,
) -> Result<DependencyCount, StageGraphError> {
    ctx.check_graph(graph)?;
    graph.check_id(terminal)?;
    if ctx.counted_from.is_some() || ctx.slots.iter().any(|s| s.expected_arrivals != 0) {
        return Err(StageGraphError::DependenciesAlreadyCounted);
    }

    let mut visited = vec![false; graph.len()];
    let mut stack = vec![terminal];
    visited[terminal.index()] = true;
    let mut count = DependencyCount {
        reachable_nodes: 1,
        edges: 0,
    };

    while let Some(id) = stack.pop() {
        for &input in graph.node(id).inputs() {
            ctx.slots[input.index()].expected_arrivals += 1;
            count.edges += 1;
            if !visited[input.index()] {
                visited[input.index()] = true;
                count.reachable_nodes += 1;
                stack.push(input);
            }
        }
    }

    ctx.counted_from = Some(terminal);
    debug!(
        "Counted dependencies from '{}': {} reachable nodes, {} edges",
        graph.node(terminal).name(),
        count.reachable_nodes,
        count.edges
    );
    Ok(count)
}

/// Arms the backward pass: every node's remaining arrivals become its expected
/// arrivals.
pub fn reset_arrivals(ctx: &mut ExecutionContext) {
    for slot in &mut ctx.slots {
        slot.remaining_arrivals = slot.expected_arrivals;
        slot.backward_done = false;
    }
}
