use crate::error::StageGraphError;
use std::collections::BTreeMap;

/// Repeat count of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub blocks: usize,
}

/// Declarative description of a staged architecture.
///
/// Only the repeat counts shape the graph. `dims` are opaque sizes made available
/// to finders, operation factories and parameter declarations.
///
/// ```
/// use stagegraph_core::graph::ArchSpec;
///
/// let arch = ArchSpec::new("tiny")
///     .with_uniform_stages(2, 3)
///     .with_dim("hidden", 8);
/// assert!(arch.validate().is_ok());
/// assert_eq!(arch.total_blocks(), 6);
/// assert_eq!(arch.layer_index(1, 0), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ArchSpec {
    name: String,
    stages: Vec<StageSpec>,
    min_blocks_per_stage: usize,
    dims: BTreeMap<String, usize>,
}

impl ArchSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ArchSpec {
            name: name.into(),
            stages: Vec::new(),
            min_blocks_per_stage: 1,
            dims: BTreeMap::new(),
        }
    }

    /// Appends a stage with `blocks` repetitions.
    pub fn with_stage(mut self, blocks: usize) -> Self {
        self.stages.push(StageSpec { blocks });
        self
    }

    /// Appends `stages` stages with `blocks` repetitions each.
    pub fn with_uniform_stages(mut self, stages: usize, blocks: usize) -> Self {
        self.stages
            .extend(std::iter::repeat(StageSpec { blocks }).take(stages));
        self
    }

    /// Lowest block count a stage may have (1 unless overridden). Setting it to 0
    /// allows empty stages, which then contribute no nodes.
    pub fn with_min_blocks(mut self, min: usize) -> Self {
        self.min_blocks_per_stage = min;
        self
    }

    pub fn with_dim(mut self, name: impl Into<String>, value: usize) -> Self {
        self.dims.insert(name.into(), value);
        self
    }

    /// Checks the repeat counts.
    ///
    /// # Errors
    /// `InvalidArchitecture` if there are no stages or a stage has fewer blocks
    /// than the configured minimum.
    pub fn validate(&self) -> Result<(), StageGraphError> {
        if self.stages.is_empty() {
            return Err(StageGraphError::InvalidArchitecture {
                reason: format!("architecture '{}' declares no stages", self.name),
            });
        }
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.blocks < self.min_blocks_per_stage {
                return Err(StageGraphError::InvalidArchitecture {
                    reason: format!(
                        "stage {} of '{}' has {} blocks, at least {} required",
                        index, self.name, stage.blocks, self.min_blocks_per_stage
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn block_count(&self, stage: usize) -> Option<usize> {
        self.stages.get(stage).map(|s| s.blocks)
    }

    pub fn total_blocks(&self) -> usize {
        self.stages.iter().map(|s| s.blocks).sum()
    }

    pub fn dim(&self, name: &str) -> Option<usize> {
        self.dims.get(name).copied()
    }

    pub fn dims(&self) -> &BTreeMap<String, usize> {
        &self.dims
    }

    /// Running layer index of block `block` in stage `stage`.
    pub fn layer_index(&self, stage: usize, block: usize) -> Option<usize> {
        let blocks = self.block_count(stage)?;
        if block >= blocks {
            return None;
        }
        let before: usize = self.stages[..stage].iter().map(|s| s.blocks).sum();
        Some(before + block)
    }

    /// Nearest stage before `stage` that has at least one block.
    pub fn previous_non_empty_stage(&self, stage: usize) -> Option<usize> {
        (0..stage.min(self.stages.len()))
            .rev()
            .find(|&s| self.stages[s].blocks > 0)
    }
}
