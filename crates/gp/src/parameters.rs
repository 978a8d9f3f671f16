use crate::errors::{GpError, Result};
use crate::kernels::{Kernel, KernelKind};
use crate::optimization::AdamParams;
use crate::persistence::GpFileFormat;
use crate::{GP_DEFAULT_EPOCHS, GP_DEFAULT_JITTER, GP_DEFAULT_LEARNING_RATE};
use linfa::ParamGuard;

use ndarray::{Array1, array};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How kernel hyperparameters are exposed to the optimizer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Positivity {
    /// Amplitude and length scale are optimized as is, nothing prevents
    /// the optimizer from driving them to zero or below.
    #[default]
    Unconstrained,
    /// Logarithms of amplitude and length scale are optimized,
    /// hyperparameters stay positive.
    LogTransform,
}

impl Positivity {
    /// Map kernel hyperparameters to the optimizer's parameter space
    pub(crate) fn to_unconstrained(self, kernel: &Kernel) -> Array1<f64> {
        match self {
            Positivity::Unconstrained => array![kernel.amplitude, kernel.length_scale],
            Positivity::LogTransform => array![kernel.amplitude.ln(), kernel.length_scale.ln()],
        }
    }

    /// Map optimizer's parameters back to kernel hyperparameters
    pub(crate) fn apply(self, params: &Array1<f64>, kernel: &mut Kernel) {
        match self {
            Positivity::Unconstrained => {
                kernel.amplitude = params[0];
                kernel.length_scale = params[1];
            }
            Positivity::LogTransform => {
                kernel.amplitude = params[0].exp();
                kernel.length_scale = params[1].exp();
            }
        }
    }

    /// Chain rule from hyperparameters gradients to optimizer's parameters gradients
    pub(crate) fn gradients(self, kernel: &Kernel, grads: [f64; 2]) -> Array1<f64> {
        match self {
            Positivity::Unconstrained => array![grads[0], grads[1]],
            Positivity::LogTransform => {
                array![grads[0] * kernel.amplitude, grads[1] * kernel.length_scale]
            }
        }
    }
}

/// A set of validated GP trainer parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainerValidParams {
    /// Kernel family used as GP covariance
    pub(crate) kernel: KernelKind,
    /// Amplitude used when no checkpoint is restored
    pub(crate) initial_amplitude: f64,
    /// Length scale used when no checkpoint is restored
    pub(crate) initial_length_scale: f64,
    /// Adam optimizer settings
    pub(crate) adam: AdamParams,
    /// Value added to kernel matrix diagonals to improve numerical stability
    pub(crate) jitter: f64,
    /// Hyperparameters positivity handling
    pub(crate) positivity: Positivity,
    /// Directory where checkpoints are searched for and saved to
    pub(crate) checkpoint_dir: Option<PathBuf>,
}

impl Default for TrainerValidParams {
    fn default() -> TrainerValidParams {
        TrainerValidParams {
            kernel: KernelKind::default(),
            initial_amplitude: 1.,
            initial_length_scale: 1.,
            adam: AdamParams {
                learning_rate: GP_DEFAULT_LEARNING_RATE,
                ..AdamParams::default()
            },
            jitter: GP_DEFAULT_JITTER,
            positivity: Positivity::default(),
            checkpoint_dir: None,
        }
    }
}

impl TrainerValidParams {
    /// Get kernel family
    pub fn kernel(&self) -> KernelKind {
        self.kernel
    }

    /// Get initial kernel (before any training or restoration)
    pub fn initial_kernel(&self) -> Kernel {
        Kernel::new(
            self.kernel,
            self.initial_amplitude,
            self.initial_length_scale,
        )
    }

    /// Get optimizer settings
    pub fn adam(&self) -> &AdamParams {
        &self.adam
    }

    /// Get jitter
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Get positivity handling
    pub fn positivity(&self) -> Positivity {
        self.positivity
    }

    /// Get checkpoint directory
    pub fn checkpoint_dir(&self) -> Option<&Path> {
        self.checkpoint_dir.as_deref()
    }
}

#[derive(Clone, Debug, Default)]
/// The set of parameters that can be specified for the construction of
/// a [GP trainer](crate::GpTrainer).
pub struct TrainerParams(TrainerValidParams);

impl TrainerParams {
    /// A constructor for trainer parameters with default values
    pub fn new() -> TrainerParams {
        Self::default()
    }

    /// Set kernel family.
    pub fn kernel(mut self, kernel: KernelKind) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set initial amplitude.
    pub fn initial_amplitude(mut self, amplitude: f64) -> Self {
        self.0.initial_amplitude = amplitude;
        self
    }

    /// Set initial length scale.
    pub fn initial_length_scale(mut self, length_scale: f64) -> Self {
        self.0.initial_length_scale = length_scale;
        self
    }

    /// Set optimizer learning rate.
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.0.adam.learning_rate = learning_rate;
        self
    }

    /// Set optimizer exponential decay rates for first and second moment estimates.
    pub fn betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.0.adam.beta1 = beta1;
        self.0.adam.beta2 = beta2;
        self
    }

    /// Set optimizer epsilon.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.0.adam.epsilon = epsilon;
        self
    }

    /// Set jitter.
    ///
    /// Jitter is added to kernel matrix diagonals to improve numerical stability
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Set hyperparameters positivity handling.
    pub fn positivity(mut self, positivity: Positivity) -> Self {
        self.0.positivity = positivity;
        self
    }

    /// Set checkpoint directory.
    ///
    /// The latest checkpoint found there is restored when the trainer is built
    /// and new checkpoints are saved there whenever validation NLL improves.
    pub fn checkpoint_dir<P: AsRef<Path>>(mut self, dir: Option<P>) -> Self {
        self.0.checkpoint_dir = dir.map(|d| d.as_ref().to_path_buf());
        self
    }
}

impl From<TrainerValidParams> for TrainerParams {
    fn from(valid: TrainerValidParams) -> Self {
        TrainerParams(valid)
    }
}

impl ParamGuard for TrainerParams {
    type Checked = TrainerValidParams;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let p = &self.0;
        for (name, v) in [
            ("initial_amplitude", p.initial_amplitude),
            ("initial_length_scale", p.initial_length_scale),
        ] {
            if !(v.is_finite() && v > 0.) {
                return Err(GpError::InvalidValueError(format!(
                    "`{name}` should be finite and positive, got {v}"
                )));
            }
        }
        if !(p.adam.learning_rate.is_finite() && p.adam.learning_rate >= 0.) {
            return Err(GpError::InvalidValueError(format!(
                "`learning_rate` should be finite and non negative, got {}",
                p.adam.learning_rate
            )));
        }
        for (name, v) in [("beta1", p.adam.beta1), ("beta2", p.adam.beta2)] {
            if !(0. ..1.).contains(&v) {
                return Err(GpError::InvalidValueError(format!(
                    "`{name}` should be in [0, 1), got {v}"
                )));
            }
        }
        if !(p.adam.epsilon > 0.) {
            return Err(GpError::InvalidValueError(format!(
                "`epsilon` should be positive, got {}",
                p.adam.epsilon
            )));
        }
        if !(p.jitter.is_finite() && p.jitter >= 0.) {
            return Err(GpError::InvalidValueError(format!(
                "`jitter` should be finite and non negative, got {}",
                p.jitter
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// Options of a [training run](crate::GpTrainer::train_model).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub(crate) epochs: usize,
    pub(crate) patience: Option<usize>,
    pub(crate) save_dir: Option<PathBuf>,
    pub(crate) save_format: GpFileFormat,
    pub(crate) metrics: Vec<String>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            epochs: GP_DEFAULT_EPOCHS,
            patience: None,
            save_dir: None,
            save_format: GpFileFormat::default(),
            metrics: vec![],
        }
    }
}

impl TrainOptions {
    /// Options with default values: 1000 epochs, no early stopping, model not saved
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of training epochs.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the number of epochs without validation NLL improvement after which training stops.
    ///
    /// `None` or `Some(0)` disable early stopping.
    pub fn patience(mut self, patience: Option<usize>) -> Self {
        self.patience = patience.filter(|&p| p > 0);
        self
    }

    /// Set the directory the trained model is saved to at the end of training.
    pub fn save_dir<P: AsRef<Path>>(mut self, dir: Option<P>) -> Self {
        self.save_dir = dir.map(|d| d.as_ref().to_path_buf());
        self
    }

    /// Set the trained model file format.
    pub fn save_format(mut self, format: GpFileFormat) -> Self {
        self.save_format = format;
        self
    }

    /// Set names of validation metrics computed after each epoch.
    ///
    /// Valid names are `nll`, `mae`, `sharpness`, `variation`, `calibration_err`,
    /// `residuals` and `pis`.
    pub fn metrics<S: AsRef<str>>(mut self, metrics: &[S]) -> Self {
        self.metrics = metrics.iter().map(|m| m.as_ref().to_string()).collect();
        self
    }

    /// Get the maximum number of epochs
    pub fn max_epochs(&self) -> usize {
        self.epochs
    }

    /// Get patience
    pub fn max_patience(&self) -> Option<usize> {
        self.patience
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_params() {
        let params = TrainerParams::new().check().unwrap();
        assert_eq!(KernelKind::MaternOneHalf, params.kernel());
        assert_eq!(Kernel::default(), params.initial_kernel());
        assert_eq!(1e-3, params.adam().learning_rate);
        assert_eq!(1e-6, params.jitter());
        assert_eq!(Positivity::Unconstrained, params.positivity());
        assert!(params.checkpoint_dir().is_none());
    }

    #[test]
    fn test_invalid_params() {
        assert!(TrainerParams::new().initial_amplitude(0.).check().is_err());
        assert!(TrainerParams::new()
            .initial_length_scale(f64::NAN)
            .check()
            .is_err());
        assert!(TrainerParams::new().learning_rate(-1.).check().is_err());
        assert!(TrainerParams::new().betas(0.9, 1.).check().is_err());
        assert!(TrainerParams::new().epsilon(0.).check().is_err());
        assert!(TrainerParams::new().jitter(-1e-6).check().is_err());
        assert!(TrainerParams::new().learning_rate(0.).check().is_ok());
    }

    #[test]
    fn test_positivity_round_trip() {
        let kernel = Kernel::new(KernelKind::MaternOneHalf, 2., 0.5);
        for positivity in [Positivity::Unconstrained, Positivity::LogTransform] {
            let params = positivity.to_unconstrained(&kernel);
            let mut restored = Kernel::default();
            positivity.apply(&params, &mut restored);
            assert_abs_diff_eq!(kernel.amplitude, restored.amplitude, epsilon = 1e-12);
            assert_abs_diff_eq!(kernel.length_scale, restored.length_scale, epsilon = 1e-12);
        }
        let grads = Positivity::LogTransform.gradients(&kernel, [1., 1.]);
        assert_abs_diff_eq!(array![2., 0.5], grads, epsilon = 1e-12);
    }

    #[test]
    fn test_train_options() {
        let options = TrainOptions::new();
        assert_eq!(1000, options.max_epochs());
        assert_eq!(None, options.max_patience());
        assert_eq!(GpFileFormat::Json, options.save_format);

        let options = TrainOptions::new()
            .epochs(10)
            .patience(Some(0))
            .metrics(&["nll", "mae"]);
        assert_eq!(None, options.max_patience());
        assert_eq!(vec!["nll".to_string(), "mae".to_string()], options.metrics);
        assert_eq!(Some(3), TrainOptions::new().patience(Some(3)).max_patience());
    }
}
