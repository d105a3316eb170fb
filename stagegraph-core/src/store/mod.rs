use crate::error::StageGraphError;
use crate::tensor::{zeros_like, Tensor};
use std::collections::BTreeMap;
use std::fmt;

/// Structured key of a learnable parameter: `(stage, block, parameter)`.
///
/// Graph-level parameters that belong to no stage or block conventionally use an
/// empty string for the missing part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamedKey {
    pub stage: String,
    pub block: String,
    pub parameter: String,
}

impl NamedKey {
    pub fn new(
        stage: impl Into<String>,
        block: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        NamedKey {
            stage: stage.into(),
            block: block.into(),
            parameter: parameter.into(),
        }
    }

    /// Hierarchical dotted name, skipping empty parts (e.g. `stage_0.block_1.w_qkv`).
    pub fn dotted(&self) -> String {
        [&self.stage, &self.block, &self.parameter]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for NamedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.stage, self.block, self.parameter)
    }
}

/// A weight tensor and its paired gradient accumulator (same shape).
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEntry {
    weight: Tensor,
    gradient: Tensor,
}

impl ParameterEntry {
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn gradient(&self) -> &Tensor {
        &self.gradient
    }

    pub fn gradient_mut(&mut self) -> &mut Tensor {
        &mut self.gradient
    }

    /// Mutable weight together with the read-only gradient, as an optimizer step
    /// needs both at once.
    pub fn weight_and_gradient_mut(&mut self) -> (&mut Tensor, &Tensor) {
        (&mut self.weight, &self.gradient)
    }
}

/// Name-indexed storage of learnable parameters.
///
/// The graph engine reads weights during forward and accumulates into gradients
/// during backward; it never changes weights. Entries persist across executions
/// and are updated by an optimizer between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedStore {
    entries: BTreeMap<NamedKey, ParameterEntry>,
}

impl NamedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a parameter with a zeroed gradient accumulator.
    ///
    /// # Errors
    /// `StageGraphError::DuplicateParameter` if the key is already present.
    pub fn insert(&mut self, key: NamedKey, weight: Tensor) -> Result<(), StageGraphError> {
        if self.entries.contains_key(&key) {
            return Err(StageGraphError::DuplicateParameter {
                key: key.to_string(),
            });
        }
        let gradient = zeros_like(&weight)?;
        self.entries.insert(key, ParameterEntry { weight, gradient });
        Ok(())
    }

    pub fn contains(&self, key: &NamedKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &NamedKey) -> Result<&ParameterEntry, StageGraphError> {
        self.entries.get(key).ok_or_else(|| unknown(key))
    }

    pub fn entry_mut(&mut self, key: &NamedKey) -> Result<&mut ParameterEntry, StageGraphError> {
        self.entries.get_mut(key).ok_or_else(|| unknown(key))
    }

    /// Returns the weight stored under `key`.
    pub fn weight(&self, key: &NamedKey) -> Result<&Tensor, StageGraphError> {
        self.entry(key).map(ParameterEntry::weight)
    }

    /// Returns the gradient accumulator stored under `key`.
    pub fn gradient(&self, key: &NamedKey) -> Result<&Tensor, StageGraphError> {
        self.entry(key).map(ParameterEntry::gradient)
    }

    /// Returns the gradient accumulator stored under `key` for in-place updates.
    pub fn gradient_mut(&mut self, key: &NamedKey) -> Result<&mut Tensor, StageGraphError> {
        self.entry_mut(key).map(ParameterEntry::gradient_mut)
    }

    /// Adds `grad` into the accumulator of `key`. Shapes must match exactly.
    pub fn accumulate_gradient(&mut self, key: &NamedKey, grad: &Tensor) -> Result<(), StageGraphError> {
        self.gradient_mut(key)?
            .add_assign_checked(grad, "accumulate_gradient")
    }

    /// Resets every gradient accumulator to zero.
    pub fn zero_grad(&mut self) {
        for entry in self.entries.values_mut() {
            entry.gradient.fill_zero();
        }
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&NamedKey, &ParameterEntry)> {
        self.entries.iter()
    }

    /// Iterates mutably over entries in key order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&NamedKey, &mut ParameterEntry)> {
        self.entries.iter_mut()
    }

    /// Weights with their dotted hierarchical names, in key order.
    pub fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.dotted(), &e.weight))
            .collect()
    }
}

fn unknown(key: &NamedKey) -> StageGraphError {
    StageGraphError::UnknownParameter {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{full, ones};

    fn key(p: &str) -> NamedKey {
        NamedKey::new("stage_0", "block_0", p)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = NamedStore::new();
        store.insert(key("w"), ones(&[2, 2]).unwrap()).unwrap();
        assert!(store.contains(&key("w")));
        assert_eq!(store.weight(&key("w")).unwrap().sum(), 4.0);
        assert!(store.gradient(&key("w")).unwrap().is_all_zero());
        assert_eq!(store.gradient(&key("w")).unwrap().shape(), &[2, 2]);
    }

    #[test]
    fn test_unknown_parameter() {
        let store = NamedStore::new();
        let err = store.weight(&key("missing")).unwrap_err();
        assert_eq!(
            err,
            StageGraphError::UnknownParameter {
                key: "(stage_0, block_0, missing)".to_string()
            }
        );
        assert!(store.gradient(&key("missing")).is_err());
    }

    #[test]
    fn test_duplicate_parameter() {
        let mut store = NamedStore::new();
        store.insert(key("w"), ones(&[1]).unwrap()).unwrap();
        assert!(matches!(
            store.insert(key("w"), ones(&[1]).unwrap()),
            Err(StageGraphError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn test_accumulate_and_zero_grad() {
        let mut store = NamedStore::new();
        store.insert(key("b"), ones(&[3]).unwrap()).unwrap();
        let g = full(&[3], 0.5).unwrap();
        store.accumulate_gradient(&key("b"), &g).unwrap();
        store.accumulate_gradient(&key("b"), &g).unwrap();
        assert_eq!(store.gradient(&key("b")).unwrap().data(), &[1.0, 1.0, 1.0]);

        assert!(store.accumulate_gradient(&key("b"), &ones(&[2]).unwrap()).is_err());

        store.zero_grad();
        assert!(store.gradient(&key("b")).unwrap().is_all_zero());
        assert_eq!(store.weight(&key("b")).unwrap().sum(), 3.0);
    }

    #[test]
    fn test_named_parameters_are_dotted_and_ordered() {
        let mut store = NamedStore::new();
        store.insert(NamedKey::new("", "", "head"), ones(&[1]).unwrap()).unwrap();
        store.insert(key("w"), ones(&[1]).unwrap()).unwrap();
        let names: Vec<String> = store.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["head".to_string(), "stage_0.block_0.w".to_string()]);
    }
}
