use super::context::ExecutionContext;
use crate::error::StageGraphError;
use crate::graph::Graph;
use crate::ops::OpKind;
use crate::store::NamedStore;
use crate::tensor::Tensor;
use log::{debug, trace};

/// Runs every node's forward computation in construction order.
///
/// `Input` nodes take their feed, `Parameter` nodes copy their weight from `store`,
/// all others run their kernel on the outputs of their inputs. Any previous
/// gradients and dependency counts in `ctx` are discarded.
///
/// # Errors
/// `MissingFeed`, `UnknownParameter`, or whatever a kernel reports. The context is
/// left partially filled; the graph stays usable.
pub fn run_forward(graph: &Graph, ctx: &mut ExecutionContext, store: &NamedStore) -> Result<(), StageGraphError> {
    ctx.check_graph(graph)?;
    ctx.reset();
    for (id, node) in graph.nodes() {
        let output = match node.kind() {
            OpKind::Input { name } => ctx
                .feed_value(name)
                .cloned()
                .ok_or_else(|| StageGraphError::MissingFeed { name: name.clone() })?,
            OpKind::Parameter(key) => store.weight(key)?.clone(),
            kind => {
                let inputs = node
                    .inputs()
                    .iter()
                    .map(|&input| ctx.require_output(graph, input))
                    .collect::<Result<Vec<&Tensor>, _>>()?;
                kind.forward(&inputs)?
            }
        };
        trace!("forward {} '{}' -> {:?}", id, node.name(), output.shape());
        ctx.slots[id.index()].output = Some(output);
    }
    debug!("Forward pass completed over {} nodes", graph.len());
    Ok(())
}
