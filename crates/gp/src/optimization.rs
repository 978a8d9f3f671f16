use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

/// Adam optimizer hyperparameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdamParams {
    /// Step size
    pub learning_rate: f64,
    /// Exponential decay rate of first moment estimates
    pub beta1: f64,
    /// Exponential decay rate of second moment estimates
    pub beta2: f64,
    /// Small constant for numerical stability
    pub epsilon: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        AdamParams {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

/// Adam optimizer state: iteration count and first/second moment estimates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    /// Number of updates applied so far
    pub iterations: u64,
    /// First moment estimates
    pub m: Array1<f64>,
    /// Second moment estimates
    pub v: Array1<f64>,
}

impl AdamState {
    /// Fresh state for `n_params` parameters
    pub fn new(n_params: usize) -> Self {
        AdamState {
            iterations: 0,
            m: Array1::zeros(n_params),
            v: Array1::zeros(n_params),
        }
    }
}

/// Adaptive moment estimation over a small vector of parameters.
///
/// Follows the bias corrected update folded into the step size:
/// `lr_t = lr * sqrt(1 - beta2^t) / (1 - beta1^t)` and
/// `param -= lr_t * m / (sqrt(v) + epsilon)`.
#[derive(Clone, Debug)]
pub(crate) struct Adam {
    params: AdamParams,
    state: AdamState,
}

impl Adam {
    pub fn new(params: AdamParams, n_params: usize) -> Self {
        Adam {
            params,
            state: AdamState::new(n_params),
        }
    }

    pub fn state(&self) -> &AdamState {
        &self.state
    }

    pub fn set_state(&mut self, state: AdamState) {
        self.state = state;
    }

    /// Apply one update of `params` given `grads` of the loss
    pub fn apply_gradients(&mut self, params: &mut Array1<f64>, grads: &Array1<f64>) {
        let AdamParams {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.params;
        self.state.iterations += 1;
        let t = self.state.iterations as i32;
        let lr_t = learning_rate * (1. - beta2.powi(t)).sqrt() / (1. - beta1.powi(t));

        Zip::from(params)
            .and(&mut self.state.m)
            .and(&mut self.state.v)
            .and(grads)
            .for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1. - beta1) * g;
                *v = beta2 * *v + (1. - beta2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + epsilon);
            });
    }
}
