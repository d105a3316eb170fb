//! Operation finders: named resolvers that pick the source of a node input.
//!
//! A finder is asked once per emitted node, with the structural position of that
//! node, and answers with either an already emitted node or a store key. The answer
//! is turned into a [`NodeId`] immediately, so no name lookup happens during
//! execution.

use super::arch::ArchSpec;
use super::node::NodeId;
use super::template::NameTemplate;
use super::Graph;
use crate::store::NamedKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Structural position a finder is queried for.
///
/// Graph-level scopes carry no indices, stage scopes carry only `stage_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinderContext {
    pub layer_index: Option<usize>,
    pub stage_index: Option<usize>,
    pub block_index: Option<usize>,
}

impl FinderContext {
    pub fn stage(stage: usize) -> Self {
        FinderContext {
            stage_index: Some(stage),
            ..Self::default()
        }
    }

    pub fn block(stage: usize, block: usize, layer: usize) -> Self {
        FinderContext {
            layer_index: Some(layer),
            stage_index: Some(stage),
            block_index: Some(block),
        }
    }

    /// Store key of parameter `name` in this context: `stage_{s}` and `block_{b}`
    /// when the indices exist, empty strings otherwise.
    pub fn parameter_key(&self, name: impl Into<String>) -> NamedKey {
        NamedKey::new(
            self.stage_index.map(|s| format!("stage_{}", s)).unwrap_or_default(),
            self.block_index.map(|b| format!("block_{}", b)).unwrap_or_default(),
            name,
        )
    }
}

impl fmt::Display for FinderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part(v: Option<usize>) -> String {
            v.map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "layer={} stage={} block={}",
            part(self.layer_index),
            part(self.stage_index),
            part(self.block_index)
        )
    }
}

/// What a finder resolved an input to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Node(NodeId),
    Parameter(NamedKey),
}

/// Read-only view of the partially built graph handed to finders.
#[derive(Clone, Copy)]
pub struct FinderScope<'a> {
    graph: &'a Graph,
    arch: &'a ArchSpec,
}

impl<'a> FinderScope<'a> {
    pub fn new(graph: &'a Graph, arch: &'a ArchSpec) -> Self {
        FinderScope { graph, arch }
    }

    /// Already emitted node called `name`.
    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.graph.find(name)
    }

    pub fn dim(&self, name: &str) -> Option<usize> {
        self.arch.dim(name)
    }

    pub fn arch(&self) -> &'a ArchSpec {
        self.arch
    }

    pub fn stage_count(&self) -> usize {
        self.arch.stage_count()
    }

    pub fn block_count(&self, stage: usize) -> Option<usize> {
        self.arch.block_count(stage)
    }
}

type FinderFn = dyn Fn(&FinderContext, &FinderScope<'_>) -> Option<Binding> + Send + Sync;

/// Named resolver for one kind of input.
///
/// Relative finders ([`previous_block`](Self::previous_block),
/// [`previous_stage`](Self::previous_stage)) compute `index - 1` from the context
/// and delegate to a fallback at index 0.
#[derive(Clone)]
pub struct OperationFinder(Arc<FinderFn>);

impl OperationFinder {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&FinderContext, &FinderScope<'_>) -> Option<Binding> + Send + Sync + 'static,
    {
        OperationFinder(Arc::new(f))
    }

    /// The node whose name is `template` rendered in the current context.
    pub fn node(template: impl Into<NameTemplate>) -> Self {
        let template = template.into();
        Self::from_fn(move |ctx, scope| {
            let name = template.render(ctx)?;
            scope.lookup(&name).map(Binding::Node)
        })
    }

    /// The store entry `template` of the current stage and block.
    pub fn parameter(template: impl Into<NameTemplate>) -> Self {
        let template = template.into();
        Self::from_fn(move |ctx, _| {
            let name = template.render(ctx)?;
            Some(Binding::Parameter(ctx.parameter_key(name)))
        })
    }

    /// A store entry that belongs to no stage or block.
    pub fn graph_parameter(name: impl Into<String>) -> Self {
        let key = NamedKey::new("", "", name);
        Self::from_fn(move |_, _| Some(Binding::Parameter(key.clone())))
    }

    /// Node `template` of the previous block in the same stage; `fallback` for the
    /// first block.
    pub fn previous_block(template: impl Into<NameTemplate>, fallback: OperationFinder) -> Self {
        let template = template.into();
        Self::from_fn(move |ctx, scope| match (ctx.block_index, ctx.layer_index) {
            (Some(block), Some(layer)) if block > 0 => {
                let prev = FinderContext {
                    layer_index: Some(layer - 1),
                    stage_index: ctx.stage_index,
                    block_index: Some(block - 1),
                };
                let name = template.render(&prev)?;
                scope.lookup(&name).map(Binding::Node)
            }
            _ => fallback.resolve(ctx, scope),
        })
    }

    /// Node `template` of the nearest earlier stage that has blocks, rendered at
    /// that stage's last block; `fallback` when there is none.
    pub fn previous_stage(template: impl Into<NameTemplate>, fallback: OperationFinder) -> Self {
        let template = template.into();
        Self::from_fn(move |ctx, scope| {
            let arch = scope.arch();
            let prev_stage = ctx.stage_index.and_then(|s| arch.previous_non_empty_stage(s));
            match prev_stage {
                Some(prev) => {
                    let last = arch.block_count(prev)?.checked_sub(1)?;
                    let prev_ctx = FinderContext {
                        layer_index: arch.layer_index(prev, last),
                        stage_index: Some(prev),
                        block_index: Some(last),
                    };
                    let name = template.render(&prev_ctx)?;
                    scope.lookup(&name).map(Binding::Node)
                }
                None => fallback.resolve(ctx, scope),
            }
        })
    }

    /// Node `template` of the last block of the current stage; `fallback` if the
    /// stage has no blocks.
    pub fn last_block(template: impl Into<NameTemplate>, fallback: OperationFinder) -> Self {
        let template = template.into();
        Self::from_fn(move |ctx, scope| {
            let stage = ctx.stage_index?;
            match scope.block_count(stage)?.checked_sub(1) {
                Some(last) => {
                    let last_ctx = FinderContext {
                        layer_index: scope.arch().layer_index(stage, last),
                        stage_index: Some(stage),
                        block_index: Some(last),
                    };
                    let name = template.render(&last_ctx)?;
                    scope.lookup(&name).map(Binding::Node)
                }
                None => fallback.resolve(ctx, scope),
            }
        })
    }

    pub fn resolve(&self, ctx: &FinderContext, scope: &FinderScope<'_>) -> Option<Binding> {
        (self.0)(ctx, scope)
    }
}

impl fmt::Debug for OperationFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OperationFinder(..)")
    }
}

/// Finders by name, as referenced from [`OpTemplate`](super::OpTemplate) inputs.
#[derive(Debug, Clone, Default)]
pub struct FinderRegistry {
    finders: HashMap<String, OperationFinder>,
}

impl FinderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `finder` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, finder: OperationFinder) -> &mut Self {
        self.finders.insert(name.into(), finder);
        self
    }

    pub fn with(mut self, name: impl Into<String>, finder: OperationFinder) -> Self {
        self.register(name, finder);
        self
    }

    pub fn get(&self, name: &str) -> Option<&OperationFinder> {
        self.finders.get(name)
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }
}
