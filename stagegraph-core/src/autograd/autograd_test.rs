use super::*;
use crate::error::StageGraphError;
use crate::graph::{Graph, NodeId, OperationNode};
use crate::ops::{OpKind, Operation};
use crate::store::{NamedKey, NamedStore};
use crate::tensor::{ones, Tensor};
use crate::utils::testing::check_tensor_near;
use std::sync::Arc;

fn t(data: &[f64], shape: &[usize]) -> Tensor {
    Tensor::new(data.to_vec(), shape.to_vec()).unwrap()
}

/// loss = sum(x * w) + sum(x * x); `dead` hangs off x but feeds nothing.
fn fan_out_graph() -> (Graph, NamedStore, NodeId) {
    let mut g = Graph::new();
    let w_key = NamedKey::new("", "", "w");
    let x = g.add_input("x").unwrap();
    let w = g.parameter(&w_key).unwrap();
    let xw = g.add_node(OperationNode::new("xw", OpKind::Mul, vec![x, w])).unwrap();
    let xx = g.add_node(OperationNode::new("xx", OpKind::Mul, vec![x, x])).unwrap();
    g.add_node(OperationNode::new("dead", OpKind::Relu, vec![x])).unwrap();
    let s = g.add_node(OperationNode::new("s", OpKind::Add, vec![xw, xx])).unwrap();
    let loss = g.add_node(OperationNode::new("loss", OpKind::SumAll, vec![s])).unwrap();

    let mut store = NamedStore::new();
    store.insert(w_key, t(&[0.5, -1.0], &[2])).unwrap();
    (g, store, loss)
}

fn forward_ctx(g: &Graph, store: &NamedStore) -> ExecutionContext {
    let mut ctx = ExecutionContext::new(g);
    ctx.feed("x", t(&[2.0, 3.0], &[2]));
    run_forward(g, &mut ctx, store).unwrap();
    ctx
}

#[test]
fn test_forward_values() {
    let (g, store, loss) = fan_out_graph();
    let ctx = forward_ctx(&g, &store);
    // 2*0.5 + 3*-1 + 4 + 9
    assert_eq!(ctx.output(loss).unwrap(), &Tensor::scalar(11.0));
}

#[test]
fn test_count_dependencies_fan_out() {
    let (g, store, loss) = fan_out_graph();
    let mut ctx = forward_ctx(&g, &store);
    let count = count_dependencies(&g, &mut ctx, loss).unwrap();
    let x = g.find("x").unwrap();
    // xw once, xx twice; `dead` is not reached from the loss.
    assert_eq!(ctx.expected_arrivals(x), 3);
    assert_eq!(ctx.expected_arrivals(g.find("dead").unwrap()), 0);
    assert_eq!(count.reachable_nodes, 6);
    assert_eq!(count.edges, 7);
    assert_eq!(ctx.total_expected_arrivals(), count.edges);
    assert_eq!(ctx.counted_terminal(), Some(loss));
}

#[test]
fn test_double_count_fails_fast() {
    let (g, store, loss) = fan_out_graph();
    let mut ctx = forward_ctx(&g, &store);
    count_dependencies(&g, &mut ctx, loss).unwrap();
    assert_eq!(
        count_dependencies(&g, &mut ctx, loss),
        Err(StageGraphError::DependenciesAlreadyCounted)
    );
    ctx.reset_backward();
    assert!(count_dependencies(&g, &mut ctx, loss).is_ok());
}

#[test]
fn test_backward_sums_fan_out() {
    let (g, mut store, loss) = fan_out_graph();
    let mut ctx = forward_ctx(&g, &store);
    count_dependencies(&g, &mut ctx, loss).unwrap();
    reset_arrivals(&mut ctx);
    let report = backward(&g, &mut ctx, &mut store, loss, &Tensor::scalar(1.0)).unwrap();

    // d/dx = w + 2x
    let x = g.find("x").unwrap();
    check_tensor_near(ctx.gradient(x).unwrap(), &[2], &[4.5, 5.0], 1e-12);
    let w_grad = store.gradient(&NamedKey::new("", "", "w")).unwrap();
    check_tensor_near(w_grad, &[2], &[2.0, 3.0], 1e-12);

    assert_eq!(report.visited_nodes, 6);
    assert_eq!(report.skipped_nodes, 1);
    assert!(!report.short_circuited);
    for (id, _) in g.nodes() {
        assert_eq!(ctx.remaining_arrivals(id), 0);
        assert_eq!(ctx.backward_done(id), ctx.expected_arrivals(id) > 0 || id == loss);
    }
    assert!(ctx.gradient(g.find("dead").unwrap()).is_none());
}

#[test]
fn test_backward_requires_count_and_arming() {
    let (g, mut store, loss) = fan_out_graph();
    let mut ctx = forward_ctx(&g, &store);
    assert_eq!(
        backward(&g, &mut ctx, &mut store, loss, &Tensor::scalar(1.0)),
        Err(StageGraphError::DependenciesNotCounted)
    );
    count_dependencies(&g, &mut ctx, loss).unwrap();
    assert!(matches!(
        backward(&g, &mut ctx, &mut store, loss, &Tensor::scalar(1.0)),
        Err(StageGraphError::InternalError(_))
    ));
    let other = g.find("s").unwrap();
    reset_arrivals(&mut ctx);
    assert_eq!(
        backward(&g, &mut ctx, &mut store, other, &ones(&[2]).unwrap()),
        Err(StageGraphError::DependenciesNotCounted)
    );
}

#[test]
fn test_second_backward_without_reset_is_rejected() {
    let (g, mut store, loss) = fan_out_graph();
    let mut ctx = forward_ctx(&g, &store);
    count_dependencies(&g, &mut ctx, loss).unwrap();
    reset_arrivals(&mut ctx);
    backward(&g, &mut ctx, &mut store, loss, &Tensor::scalar(1.0)).unwrap();
    assert!(backward(&g, &mut ctx, &mut store, loss, &Tensor::scalar(1.0)).is_err());
}

#[test]
fn test_zero_seed_short_circuits() {
    let (g, mut store, loss) = fan_out_graph();
    let mut ctx = forward_ctx(&g, &store);
    count_dependencies(&g, &mut ctx, loss).unwrap();
    reset_arrivals(&mut ctx);
    let report = backward(&g, &mut ctx, &mut store, loss, &Tensor::scalar(0.0)).unwrap();
    assert!(report.short_circuited);
    assert_eq!(report.visited_nodes, 0);
    assert!(store.gradient(&NamedKey::new("", "", "w")).unwrap().is_all_zero());
    assert!(g.nodes().all(|(id, _)| ctx.gradient(id).is_none()));
}

#[test]
fn test_seed_shape_checked() {
    let (g, mut store, loss) = fan_out_graph();
    let mut ctx = forward_ctx(&g, &store);
    count_dependencies(&g, &mut ctx, loss).unwrap();
    reset_arrivals(&mut ctx);
    assert!(matches!(
        backward(&g, &mut ctx, &mut store, loss, &ones(&[2]).unwrap()),
        Err(StageGraphError::ShapeMismatch { .. })
    ));
}

#[derive(Debug)]
struct TruncatingGrad;

impl Operation for TruncatingGrad {
    fn name(&self) -> &str {
        "truncating"
    }

    fn forward(&self, inputs: &[&Tensor]) -> Result<Tensor, StageGraphError> {
        Ok(inputs[0].clone())
    }

    fn backward(
        &self,
        _inputs: &[&Tensor],
        _output: &Tensor,
        grad_output: &Tensor,
    ) -> Result<Vec<Tensor>, StageGraphError> {
        Ok(vec![Tensor::new(vec![grad_output.data()[0]], vec![1])?])
    }
}

#[test]
fn test_gradient_shape_mismatch_is_fatal() {
    let mut g = Graph::new();
    let x = g.add_input("x").unwrap();
    let bad = g
        .add_node(OperationNode::new("bad", OpKind::Custom(Arc::new(TruncatingGrad)), vec![x]))
        .unwrap();
    let mut store = NamedStore::new();
    let mut ctx = ExecutionContext::new(&g);
    ctx.feed("x", t(&[1.0, 2.0, 3.0], &[3]));
    run_forward(&g, &mut ctx, &store).unwrap();
    count_dependencies(&g, &mut ctx, bad).unwrap();
    reset_arrivals(&mut ctx);
    let err = backward(&g, &mut ctx, &mut store, bad, &ones(&[3]).unwrap()).unwrap_err();
    assert_eq!(
        err,
        StageGraphError::GradientShapeMismatch {
            node: "bad".to_string(),
            input_index: 0,
            expected: vec![3],
            actual: vec![1],
        }
    );
    assert!(ctx.gradient(x).is_none());
}

#[test]
fn test_failed_backward_leaves_store_untouched() {
    // w is visited before `bad` fails, so its gradient must not reach the store.
    let mut g = Graph::new();
    let w_key = NamedKey::new("stage_0", "block_0", "w");
    let x = g.add_input("x").unwrap();
    let bad = g
        .add_node(OperationNode::new("bad", OpKind::Custom(Arc::new(TruncatingGrad)), vec![x]))
        .unwrap();
    let w = g.parameter(&w_key).unwrap();
    let y = g.add_node(OperationNode::new("y", OpKind::Mul, vec![bad, w])).unwrap();
    let loss = g.add_node(OperationNode::new("loss", OpKind::SumAll, vec![y])).unwrap();

    let mut store = NamedStore::new();
    store.insert(w_key.clone(), t(&[1.0, -1.0], &[2])).unwrap();
    let mut session = Session::new(&g);
    session.feed("x", t(&[2.0, 3.0], &[2]));
    session.run_forward(&store).unwrap();

    for _ in 0..2 {
        let err = session
            .run_backward(&mut store, loss, &Tensor::scalar(1.0))
            .unwrap_err();
        assert!(matches!(err, StageGraphError::GradientShapeMismatch { .. }));
        assert!(store.gradient(&w_key).unwrap().is_all_zero());
    }
}

#[test]
fn test_missing_feed_and_output() {
    let (g, mut store, loss) = fan_out_graph();
    let mut ctx = ExecutionContext::new(&g);
    assert_eq!(
        run_forward(&g, &mut ctx, &store),
        Err(StageGraphError::MissingFeed { name: "x".to_string() })
    );

    let mut fresh = ExecutionContext::new(&g);
    count_dependencies(&g, &mut fresh, loss).unwrap();
    reset_arrivals(&mut fresh);
    assert_eq!(
        backward(&g, &mut fresh, &mut store, loss, &Tensor::scalar(1.0)),
        Err(StageGraphError::MissingOutput { node: "loss".to_string() })
    );
}

#[test]
fn test_context_for_other_graph_rejected() {
    let (g, store, _) = fan_out_graph();
    let mut ctx = ExecutionContext::new(&Graph::new());
    assert!(matches!(
        run_forward(&g, &mut ctx, &store),
        Err(StageGraphError::InternalError(_))
    ));
}

#[test]
fn test_session_step_and_reuse() {
    let (g, mut store, _) = fan_out_graph();
    let mut session = Session::new(&g);
    session.feed("x", t(&[2.0, 3.0], &[2]));
    let loss = session.step(&mut store, "loss").unwrap();
    assert_eq!(loss, 11.0);
    check_tensor_near(session.gradient("x").unwrap().unwrap(), &[2], &[4.5, 5.0], 1e-12);

    // Second execution over new feeds; store gradients accumulate.
    session.feed("x", t(&[1.0, 1.0], &[2]));
    let loss = session.step(&mut store, "loss").unwrap();
    assert_eq!(loss, 1.5);
    check_tensor_near(session.gradient("x").unwrap().unwrap(), &[2], &[2.5, 1.0], 1e-12);
    let w_grad = store.gradient(&NamedKey::new("", "", "w")).unwrap();
    check_tensor_near(w_grad, &[2], &[3.0, 4.0], 1e-12);
    assert!(session.output("nope").is_err());
}

#[test]
fn test_session_step_needs_scalar_loss() {
    let (g, mut store, _) = fan_out_graph();
    let mut session = Session::new(&g);
    session.feed("x", t(&[2.0, 3.0], &[2]));
    assert!(matches!(
        session.step(&mut store, "s"),
        Err(StageGraphError::ShapeMismatch { .. })
    ));
}
