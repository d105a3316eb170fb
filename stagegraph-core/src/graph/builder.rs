use super::arch::ArchSpec;
use super::finder::{Binding, FinderContext, FinderRegistry, FinderScope};
use super::node::{NodeId, OperationNode, Position};
use super::template::{OpTemplate, ParamTemplate};
use super::Graph;
use crate::error::StageGraphError;
use log::{debug, trace};

/// Structural unit a template is repeated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Once, before the first stage.
    Prologue,
    /// Once per non-empty stage, before its blocks.
    StageBegin,
    /// Once per block of every stage.
    Block,
    /// Once per non-empty stage, after its blocks.
    StageEnd,
    /// Once, after the last stage.
    Epilogue,
}

/// Expands an [`ArchSpec`] into a concrete [`Graph`].
///
/// Emission order is: graph inputs, prologue templates, then for each stage its
/// `StageBegin` templates, every block's `Block` templates and its `StageEnd`
/// templates, and finally the epilogue templates. Within a scope, templates are
/// emitted in declaration order, so a finder can only see nodes emitted before it.
/// Stages with zero blocks emit nothing.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    inputs: Vec<String>,
    ops: Vec<(Scope, OpTemplate)>,
    params: Vec<(Scope, ParamTemplate)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a graph input fed per execution.
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn op(mut self, scope: Scope, template: OpTemplate) -> Self {
        self.ops.push((scope, template));
        self
    }

    /// Declares the shape of a parameter, keyed like
    /// [`OperationFinder::parameter`](super::OperationFinder::parameter) keys it.
    pub fn parameter(mut self, scope: Scope, template: ParamTemplate) -> Self {
        self.params.push((scope, template));
        self
    }

    /// Validates `arch` and emits the graph.
    ///
    /// # Errors
    /// * `InvalidArchitecture` for bad repeat counts, a template that cannot be
    ///   rendered in its scope, or an unusable parameter declaration.
    /// * `UnresolvedReference` if an input names an unregistered finder or the finder
    ///   yields nothing for the context.
    /// * Errors of [`Graph::add_node`] (duplicate names, arity).
    pub fn build(&self, arch: &ArchSpec, finders: &FinderRegistry) -> Result<Graph, StageGraphError> {
        arch.validate()?;
        let mut graph = Graph::new();
        for name in &self.inputs {
            graph.add_input(name)?;
        }

        self.emit_scope(&mut graph, arch, finders, Scope::Prologue, FinderContext::default())?;
        for (stage, spec) in arch.stages().iter().enumerate() {
            if spec.blocks == 0 {
                debug!("Stage {} of '{}' has no blocks, skipping", stage, arch.name());
                continue;
            }
            self.emit_scope(&mut graph, arch, finders, Scope::StageBegin, FinderContext::stage(stage))?;
            for block in 0..spec.blocks {
                let layer = arch.layer_index(stage, block).ok_or_else(|| {
                    StageGraphError::InternalError(format!("no layer index for stage {} block {}", stage, block))
                })?;
                let ctx = FinderContext::block(stage, block, layer);
                self.emit_scope(&mut graph, arch, finders, Scope::Block, ctx)?;
            }
            self.emit_scope(&mut graph, arch, finders, Scope::StageEnd, FinderContext::stage(stage))?;
        }
        self.emit_scope(&mut graph, arch, finders, Scope::Epilogue, FinderContext::default())?;

        debug!(
            "Built graph for '{}': {} nodes, {} edges, {} declared parameters",
            arch.name(),
            graph.len(),
            graph.edge_count(),
            graph.declared_parameters().len()
        );
        Ok(graph)
    }

    fn emit_scope(
        &self,
        graph: &mut Graph,
        arch: &ArchSpec,
        finders: &FinderRegistry,
        scope: Scope,
        ctx: FinderContext,
    ) -> Result<(), StageGraphError> {
        for template in self.params.iter().filter(|(s, _)| *s == scope).map(|(_, t)| t) {
            let name = template.name().render(&ctx).ok_or_else(|| unrenderable(template.name(), &ctx))?;
            let shape = template.resolve_shape(arch)?;
            graph.declare_parameter(ctx.parameter_key(name), shape)?;
        }

        for template in self.ops.iter().filter(|(s, _)| *s == scope).map(|(_, t)| t) {
            let name = template.name().render(&ctx).ok_or_else(|| unrenderable(template.name(), &ctx))?;
            let mut inputs = Vec::with_capacity(template.inputs().len());
            for finder_name in template.inputs() {
                inputs.push(resolve_input(graph, arch, finders, finder_name, template, &ctx)?);
            }
            let kind = template.kind_for(&ctx, arch)?;
            let position = Position {
                stage_index: ctx.stage_index,
                block_index: ctx.block_index,
                layer_index: ctx.layer_index,
            };
            let id = graph.add_node(OperationNode::new(name, kind, inputs).with_position(position))?;
            trace!("Emitted {} '{}' ({})", id, graph.node(id).name(), ctx);
        }
        Ok(())
    }
}

fn resolve_input(
    graph: &mut Graph,
    arch: &ArchSpec,
    finders: &FinderRegistry,
    finder_name: &str,
    template: &OpTemplate,
    ctx: &FinderContext,
) -> Result<NodeId, StageGraphError> {
    let unresolved = || StageGraphError::UnresolvedReference {
        finder: finder_name.to_string(),
        template: template.name().pattern().to_string(),
        context: ctx.to_string(),
    };
    let finder = finders.get(finder_name).ok_or_else(unresolved)?;
    let binding = finder
        .resolve(ctx, &FinderScope::new(graph, arch))
        .ok_or_else(unresolved)?;
    match binding {
        Binding::Node(id) => {
            graph.check_id(id)?;
            Ok(id)
        }
        Binding::Parameter(key) => graph.parameter(&key),
    }
}

fn unrenderable(template: &super::NameTemplate, ctx: &FinderContext) -> StageGraphError {
    StageGraphError::InvalidArchitecture {
        reason: format!("template '{}' cannot be rendered at {}", template, ctx),
    }
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod tests;
