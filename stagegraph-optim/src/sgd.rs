use crate::{OptimError, Optimizer};
use log::{debug, warn};
use stagegraph_core::{NamedKey, NamedStore, Tensor};
use std::collections::HashMap;

/// Hyperparameters of [`Sgd`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdConfig {
    pub lr: f64,
    pub momentum: f64,
    /// L2 penalty added to the gradient as `weight_decay * weight`.
    pub weight_decay: f64,
}

impl Default for SgdConfig {
    fn default() -> Self {
        SgdConfig {
            lr: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }
}

impl SgdConfig {
    pub fn validate(&self) -> Result<(), OptimError> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(OptimError::InvalidHyperparameter {
                name: "lr",
                value: self.lr,
                reason: "must be positive and finite",
            });
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(OptimError::InvalidHyperparameter {
                name: "momentum",
                value: self.momentum,
                reason: "must be in [0, 1)",
            });
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(OptimError::InvalidHyperparameter {
                name: "weight_decay",
                value: self.weight_decay,
                reason: "must be non-negative",
            });
        }
        Ok(())
    }
}

/// Implements stochastic gradient descent with optional momentum and weight decay.
///
/// For every parameter, with `d = grad + weight_decay * w`:
/// * without momentum: `w -= lr * d`
/// * with momentum: `buf = momentum * buf + d; w -= lr * buf`, the buffer starting
///   at `d` on the first step.
#[derive(Debug)]
pub struct Sgd {
    config: SgdConfig,
    momentum_buffers: HashMap<NamedKey, Tensor>,
    steps: usize,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Result<Self, OptimError> {
        config.validate()?;
        Ok(Sgd {
            config,
            momentum_buffers: HashMap::new(),
            steps: 0,
        })
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    /// Number of completed steps.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn momentum_buffer(&self, key: &NamedKey) -> Option<&Tensor> {
        self.momentum_buffers.get(key)
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, store: &mut NamedStore) -> Result<(), OptimError> {
        let SgdConfig {
            lr,
            momentum,
            weight_decay,
        } = self.config;

        for (key, entry) in store.iter_mut() {
            let (weight, grad) = entry.weight_and_gradient_mut();
            let mut direction = if weight_decay != 0.0 {
                grad.zip_map(weight, "sgd_weight_decay", |g, w| g + weight_decay * w)?
            } else {
                grad.clone()
            };

            if momentum != 0.0 {
                let buffer = match self.momentum_buffers.remove(key) {
                    Some(buf) if buf.shape() == direction.shape() => {
                        buf.zip_map(&direction, "sgd_momentum", |b, d| momentum * b + d)?
                    }
                    Some(buf) => {
                        warn!(
                            "Momentum buffer for {} has shape {:?} but the parameter has {:?}; resetting it",
                            key,
                            buf.shape(),
                            direction.shape()
                        );
                        direction.clone()
                    }
                    None => direction.clone(),
                };
                direction = buffer.clone();
                self.momentum_buffers.insert(key.clone(), buffer);
            }

            for (w, d) in weight.data_mut().iter_mut().zip(direction.data()) {
                *w -= lr * d;
            }
        }

        self.steps += 1;
        debug!("Sgd: step {} updated {} parameters", self.steps, store.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn key(p: &str) -> NamedKey {
        NamedKey::new("stage_0", "block_0", p)
    }

    fn store_with(weight: &[f64], grad: &[f64]) -> NamedStore {
        let mut store = NamedStore::new();
        let n = weight.len();
        store
            .insert(key("w"), Tensor::new(weight.to_vec(), vec![n]).unwrap())
            .unwrap();
        store
            .accumulate_gradient(&key("w"), &Tensor::new(grad.to_vec(), vec![n]).unwrap())
            .unwrap();
        store
    }

    fn weights(store: &NamedStore) -> Vec<f64> {
        store.weight(&key("w")).unwrap().data().to_vec()
    }

    #[test]
    fn test_sgd_step() {
        let mut store = store_with(&[1.0, 2.0], &[10.0, -20.0]);
        let mut sgd = Sgd::new(SgdConfig {
            lr: 0.1,
            ..SgdConfig::default()
        })
        .unwrap();
        sgd.step(&mut store).unwrap();
        let w = weights(&store);
        assert_relative_eq!(w[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(w[1], 4.0, epsilon = 1e-12);
        assert_eq!(sgd.steps(), 1);
        assert!(sgd.momentum_buffer(&key("w")).is_none());
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut store = store_with(&[0.0], &[1.0]);
        let mut sgd = Sgd::new(SgdConfig {
            lr: 1.0,
            momentum: 0.5,
            weight_decay: 0.0,
        })
        .unwrap();
        sgd.step(&mut store).unwrap();
        assert_relative_eq!(weights(&store)[0], -1.0);
        // Same gradient again: buf = 0.5 * 1 + 1.
        sgd.step(&mut store).unwrap();
        assert_relative_eq!(weights(&store)[0], -2.5);
        assert_eq!(sgd.momentum_buffer(&key("w")).unwrap().data(), &[1.5]);
    }

    #[test]
    fn test_sgd_weight_decay() {
        let mut store = store_with(&[2.0], &[0.0]);
        let mut sgd = Sgd::new(SgdConfig {
            lr: 0.5,
            momentum: 0.0,
            weight_decay: 0.1,
        })
        .unwrap();
        sgd.step(&mut store).unwrap();
        assert_relative_eq!(weights(&store)[0], 1.9, epsilon = 1e-12);
    }

    #[test]
    fn test_momentum_buffer_reset_on_shape_change() {
        let mut sgd = Sgd::new(SgdConfig {
            lr: 1.0,
            momentum: 0.9,
            weight_decay: 0.0,
        })
        .unwrap();
        let mut small = store_with(&[0.0], &[1.0]);
        sgd.step(&mut small).unwrap();

        let mut wide = store_with(&[0.0, 0.0], &[1.0, 2.0]);
        sgd.step(&mut wide).unwrap();
        assert_eq!(weights(&wide), vec![-1.0, -2.0]);
        assert_eq!(sgd.momentum_buffer(&key("w")).unwrap().shape(), &[2]);
    }

    #[test]
    fn test_invalid_config() {
        for config in [
            SgdConfig { lr: 0.0, ..SgdConfig::default() },
            SgdConfig { lr: f64::NAN, ..SgdConfig::default() },
            SgdConfig { momentum: 1.0, ..SgdConfig::default() },
            SgdConfig { weight_decay: -0.1, ..SgdConfig::default() },
        ] {
            assert!(matches!(
                Sgd::new(config),
                Err(OptimError::InvalidHyperparameter { .. })
            ));
        }
    }

    #[test]
    fn test_zero_grad_clears_store() {
        let mut store = store_with(&[1.0, 2.0], &[3.0, 4.0]);
        let sgd = Sgd::new(SgdConfig::default()).unwrap();
        sgd.zero_grad(&mut store);
        assert!(store.gradient(&key("w")).unwrap().is_all_zero());
        assert_eq!(weights(&store), vec![1.0, 2.0]);
    }
}
