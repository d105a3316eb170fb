use super::arch::ArchSpec;
use super::finder::FinderContext;
use crate::error::StageGraphError;
use crate::ops::OpKind;
use std::fmt;
use std::sync::Arc;

/// Node or parameter name with `{s}`, `{b}` and `{l}` placeholders for the stage,
/// block and layer index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate(String);

impl NameTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        NameTemplate(pattern.into())
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }

    /// Substitutes the placeholders from `ctx`.
    ///
    /// Returns `None` if the pattern uses an index the context does not have, e.g.
    /// `{b}` outside of a block.
    pub fn render(&self, ctx: &FinderContext) -> Option<String> {
        let mut out = self.0.clone();
        for (placeholder, value) in [
            ("{s}", ctx.stage_index),
            ("{b}", ctx.block_index),
            ("{l}", ctx.layer_index),
        ] {
            if out.contains(placeholder) {
                out = out.replace(placeholder, &value?.to_string());
            }
        }
        Some(out)
    }
}

impl From<&str> for NameTemplate {
    fn from(pattern: &str) -> Self {
        NameTemplate::new(pattern)
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type KindFactory = Arc<dyn Fn(&FinderContext, &ArchSpec) -> Result<OpKind, StageGraphError> + Send + Sync>;

/// Where the operation kind of a templated node comes from.
#[derive(Clone)]
enum KindSource {
    Fixed(OpKind),
    Factory(KindFactory),
}

/// Declaration of one sub-operation emitted per repetition of its scope.
///
/// `inputs` are names of finders in the [`FinderRegistry`](super::FinderRegistry),
/// resolved in order at build time.
#[derive(Clone)]
pub struct OpTemplate {
    name: NameTemplate,
    kind: KindSource,
    inputs: Vec<String>,
}

impl OpTemplate {
    pub fn new(name: impl Into<NameTemplate>, kind: OpKind) -> Self {
        OpTemplate {
            name: name.into(),
            kind: KindSource::Fixed(kind),
            inputs: Vec::new(),
        }
    }

    /// Kind chosen per repetition, e.g. a `BroadcastTo` whose shape comes from the
    /// architecture dims.
    pub fn with_factory<F>(name: impl Into<NameTemplate>, factory: F) -> Self
    where
        F: Fn(&FinderContext, &ArchSpec) -> Result<OpKind, StageGraphError> + Send + Sync + 'static,
    {
        OpTemplate {
            name: name.into(),
            kind: KindSource::Factory(Arc::new(factory)),
            inputs: Vec::new(),
        }
    }

    /// Appends an input resolved by the finder registered as `finder`.
    pub fn input(mut self, finder: impl Into<String>) -> Self {
        self.inputs.push(finder.into());
        self
    }

    pub fn name(&self) -> &NameTemplate {
        &self.name
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub(crate) fn kind_for(&self, ctx: &FinderContext, arch: &ArchSpec) -> Result<OpKind, StageGraphError> {
        match &self.kind {
            KindSource::Fixed(kind) => Ok(kind.clone()),
            KindSource::Factory(factory) => factory(ctx, arch),
        }
    }
}

impl fmt::Debug for OpTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            KindSource::Fixed(kind) => kind.name().to_string(),
            KindSource::Factory(_) => "<factory>".to_string(),
        };
        f.debug_struct("OpTemplate")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// One dimension of a declared parameter shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    /// Looked up in the architecture dims.
    Named(String),
}

impl From<usize> for Dim {
    fn from(size: usize) -> Self {
        Dim::Fixed(size)
    }
}

impl From<&str> for Dim {
    fn from(name: &str) -> Self {
        Dim::Named(name.to_string())
    }
}

/// Declared shape of a parameter emitted per repetition of its scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTemplate {
    name: NameTemplate,
    shape: Vec<Dim>,
}

impl ParamTemplate {
    pub fn new(name: impl Into<NameTemplate>, shape: Vec<Dim>) -> Self {
        ParamTemplate {
            name: name.into(),
            shape,
        }
    }

    pub fn name(&self) -> &NameTemplate {
        &self.name
    }

    /// Resolves named dims against `arch`.
    pub fn resolve_shape(&self, arch: &ArchSpec) -> Result<Vec<usize>, StageGraphError> {
        self.shape
            .iter()
            .map(|dim| match dim {
                Dim::Fixed(size) => Ok(*size),
                Dim::Named(name) => arch.dim(name).ok_or_else(|| StageGraphError::InvalidArchitecture {
                    reason: format!(
                        "parameter '{}' uses dimension '{}' which '{}' does not define",
                        self.name,
                        name,
                        arch.name()
                    ),
                }),
            })
            .collect()
    }
}
