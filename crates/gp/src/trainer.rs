use crate::checkpoint::{CheckpointManager, TrainerCheckpoint};
use crate::errors::{GpError, Result};
use crate::index_points::IndexPoints;
use crate::kernels::Kernel;
use crate::metrics::{GpMetrics, Metric, MetricValue, parse_metrics};
use crate::optimization::Adam;
use crate::parameters::{TrainOptions, TrainerParams, TrainerValidParams};
use crate::persistence::{GpFileFormat, SavedGp};
use crate::prior::GpPrior;
use crate::regression::{GpPredictor, GpRegressionModel};

use linfa::ParamGuard;
use log::{debug, info};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Trainer of kernel hyperparameters of a zero mean GP.
///
/// Amplitude and length scale are fitted by Adam steps on the negative log marginal
/// likelihood of observations. The trainer also tracks the training step count, the last
/// training loss and the last values of validation scalar metrics, all of which are
/// checkpointed when a checkpoint directory is configured.
///
/// ```no_run
/// use ssegp_gp::{GpPredictor, GpTrainer, TrainOptions, convert_index_points};
/// use ndarray::array;
///
/// let x = convert_index_points(&array![[0.], [0.25], [0.5], [0.75], [1.]]).unwrap();
/// let y = array![0., 0.25, 0.5, 0.75, 1.];
/// let mut trainer = GpTrainer::new(x.clone(), y.clone(), None::<&str>).unwrap();
/// let options = TrainOptions::new().epochs(100).metrics(&["nll", "mae"]);
/// for epoch in trainer.train_model(&x, &y, options).unwrap() {
///     let epoch = epoch.unwrap();
///     println!("step {} loss {}", epoch.step, epoch.loss);
/// }
/// let (mean, stddev) = trainer.predict(&x).unwrap();
/// ```
#[derive(Debug)]
pub struct GpTrainer {
    params: TrainerValidParams,
    prior: GpPrior,
    kernel: Kernel,
    optimizer: Adam,
    training_steps: u64,
    loss: f64,
    metrics: BTreeMap<Metric, f64>,
    ckpt_manager: Option<CheckpointManager>,
}

impl GpTrainer {
    /// Trainer parameters constructor
    pub fn params() -> TrainerParams {
        TrainerParams::new()
    }

    /// Trainer with default parameters.
    ///
    /// When `checkpoint_dir` is given, the latest checkpoint found there is restored.
    pub fn new<P: AsRef<Path>>(
        index_points: IndexPoints,
        observations: Array1<f64>,
        checkpoint_dir: Option<P>,
    ) -> Result<Self> {
        let params = TrainerParams::new().checkpoint_dir(checkpoint_dir).check()?;
        Self::with_params(params, index_points, observations)
    }

    /// Trainer with given parameters.
    ///
    /// Fails when index points and observations counts differ, or when a checkpoint
    /// exists in the checkpoint directory but cannot be restored into this trainer.
    pub fn with_params(
        params: TrainerValidParams,
        index_points: IndexPoints,
        observations: Array1<f64>,
    ) -> Result<Self> {
        let prior = GpPrior::new(index_points, observations, params.jitter())?;
        let mut trainer = GpTrainer {
            kernel: params.initial_kernel(),
            optimizer: Adam::new(*params.adam(), 2),
            training_steps: 0,
            loss: f64::NAN,
            metrics: Metric::SCALARS.into_iter().map(|m| (m, f64::NAN)).collect(),
            ckpt_manager: None,
            prior,
            params,
        };
        if let Some(dir) = trainer.params.checkpoint_dir().map(Path::to_path_buf) {
            let manager = CheckpointManager::new(dir)?;
            match manager.restore()? {
                Some(ckpt) => {
                    trainer.restore(ckpt)?;
                    if let Some(path) = manager.latest_checkpoint() {
                        info!("Restored from {}", path.display());
                    }
                }
                None => info!("No checkpoints found."),
            }
            trainer.ckpt_manager = Some(manager);
        }
        Ok(trainer)
    }

    /// Restore every tracked variable from `ckpt`, or none if it is incompatible
    fn restore(&mut self, ckpt: TrainerCheckpoint) -> Result<()> {
        ckpt.check_compatible(
            self.prior.observations().len(),
            self.prior.index_points().feature_ndims(),
            &self.kernel,
        )?;
        self.kernel = ckpt.kernel;
        self.training_steps = ckpt.step;
        self.loss = ckpt.loss.unwrap_or(f64::NAN);
        for (metric, value) in self.metrics.iter_mut() {
            *value = ckpt
                .metrics
                .get(metric)
                .copied()
                .flatten()
                .unwrap_or(f64::NAN);
        }
        self.optimizer.set_state(ckpt.optimizer);
        Ok(())
    }

    fn checkpoint(&self) -> TrainerCheckpoint {
        let finite = |v: f64| if v.is_nan() { None } else { Some(v) };
        TrainerCheckpoint {
            step: self.training_steps,
            kernel: self.kernel,
            loss: finite(self.loss),
            metrics: self.metrics.iter().map(|(m, v)| (*m, finite(*v))).collect(),
            optimizer: self.optimizer.state().clone(),
            n_obs: self.prior.observations().len(),
            feature_ndims: self.prior.index_points().feature_ndims(),
        }
    }

    /// Save a checkpoint of the current state, keyed by the training step.
    ///
    /// Fails if the trainer has no checkpoint directory.
    pub fn save_checkpoint(&mut self) -> Result<PathBuf> {
        let ckpt = self.checkpoint();
        match self.ckpt_manager.as_mut() {
            Some(manager) => manager.save(&ckpt),
            None => Err(GpError::CheckpointError(
                "no checkpoint directory configured".to_string(),
            )),
        }
    }

    /// Trainer parameters
    pub fn trainer_params(&self) -> &TrainerValidParams {
        &self.params
    }

    /// GP prior over observation index points
    pub fn prior(&self) -> &GpPrior {
        &self.prior
    }

    /// Current kernel
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Current kernel amplitude
    pub fn amplitude(&self) -> f64 {
        self.kernel.amplitude
    }

    /// Current kernel length scale
    pub fn length_scale(&self) -> f64 {
        self.kernel.length_scale
    }

    /// Number of training steps executed, restored ones included
    pub fn training_steps(&self) -> u64 {
        self.training_steps
    }

    /// Training loss of the last step, `NaN` before any step
    pub fn loss(&self) -> f64 {
        self.loss
    }

    /// Last values of validation scalar metrics, `NaN` when never computed
    pub fn metrics(&self) -> &BTreeMap<Metric, f64> {
        &self.metrics
    }

    /// Last value of a validation scalar metric, `NaN` when never computed
    /// or when `metric` is not a scalar metric
    pub fn metric(&self, metric: Metric) -> f64 {
        self.metrics.get(&metric).copied().unwrap_or(f64::NAN)
    }

    /// Checkpoint manager if a checkpoint directory is configured
    pub fn checkpoint_manager(&self) -> Option<&CheckpointManager> {
        self.ckpt_manager.as_ref()
    }

    /// Perform one training step.
    ///
    /// Returns the negative log marginal likelihood of observations computed with
    /// hyperparameters before the update.
    pub fn optimize_cycle(&mut self) -> Result<f64> {
        let (loss, grads) = self.prior.nll_with_gradients(&self.kernel)?;
        let positivity = self.params.positivity();
        let mut theta = positivity.to_unconstrained(&self.kernel);
        let grads = positivity.gradients(&self.kernel, grads);
        self.optimizer.apply_gradients(&mut theta, &grads);
        positivity.apply(&theta, &mut self.kernel);
        Ok(loss)
    }

    /// Optimize hyperparameters against validation points and observations.
    ///
    /// Returns an iterator running one epoch per item and yielding the requested metrics
    /// after each epoch. Unknown metric names fail before any step is done.
    /// NLL is computed whether requested or not when early stopping or checkpointing
    /// is enabled: a checkpoint is saved whenever NLL improves and training stops
    /// after `patience` epochs without improvement. Once training ends, the model
    /// is saved in the save directory if any.
    pub fn train_model<'a>(
        &'a mut self,
        val_points: &IndexPoints,
        val_obs: &Array1<f64>,
        options: TrainOptions,
    ) -> Result<Training<'a>> {
        let mut metrics = parse_metrics(&options.metrics)?;
        let track_nll = options.patience.is_some() || self.ckpt_manager.is_some();
        if track_nll && !metrics.contains(&Metric::Nll) {
            metrics.push(Metric::Nll);
        }
        let best_nll = match self.metric(Metric::Nll) {
            nll if nll.is_nan() => f64::INFINITY,
            nll => nll,
        };
        let gp_metrics = GpMetrics::new(&*self, val_points, val_obs)?;
        Ok(Training {
            trainer: self,
            gp_metrics,
            metrics,
            track_nll,
            early_stopping: EarlyStopping::new(options.patience, best_nll),
            epoch: 0,
            epochs: options.epochs,
            save_dir: options.save_dir,
            save_format: options.save_format,
            stop: false,
            done: false,
        })
    }

    /// Snapshot of the trained model
    pub fn saved_model(&self) -> SavedGp {
        SavedGp {
            kernel: self.kernel,
            jitter: self.prior.jitter(),
            index_points: self.prior.index_points().clone(),
            observations: self.prior.observations().clone(),
            step: self.training_steps,
            loss: if self.loss.is_nan() { None } else { Some(self.loss) },
        }
    }

    /// Save the trained model in `dir`, returns the model file path
    pub fn save_model<P: AsRef<Path>>(&self, dir: P, format: GpFileFormat) -> Result<PathBuf> {
        self.saved_model().save(dir, format)
    }

    /// Load a model saved in `dir`
    pub fn load_model<P: AsRef<Path>>(dir: P) -> Result<SavedGp> {
        SavedGp::load(dir)
    }
}

impl GpPredictor for GpTrainer {
    /// Regression model built from current kernel hyperparameters.
    ///
    /// Nothing is mutated: predictions may run concurrently between training steps.
    fn get_model(&self, index_points: &IndexPoints) -> Result<GpRegressionModel> {
        self.prior.regression_model(&self.kernel, index_points)
    }
}

/// Metrics yielded after a training epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Training step count after the epoch
    pub step: u64,
    /// Training loss of the epoch
    pub loss: f64,
    /// Requested metrics values
    pub values: BTreeMap<Metric, MetricValue>,
}

impl EpochMetrics {
    /// Value of `metric` if computed
    pub fn get(&self, metric: Metric) -> Option<&MetricValue> {
        self.values.get(&metric)
    }

    /// Scalar value of `metric` if computed
    pub fn scalar(&self, metric: Metric) -> Option<f64> {
        self.get(metric).and_then(MetricValue::as_scalar)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Progress {
    Improved,
    Stalled,
    Exhausted,
}

/// Patience based early stopping on validation NLL
#[derive(Clone, Debug)]
struct EarlyStopping {
    patience: Option<usize>,
    best: f64,
    since: usize,
}

impl EarlyStopping {
    fn new(patience: Option<usize>, best: f64) -> Self {
        EarlyStopping {
            patience,
            best,
            since: 1,
        }
    }

    fn update(&mut self, nll: f64) -> Progress {
        if nll < self.best {
            self.best = nll;
            self.since = 1;
            return Progress::Improved;
        }
        self.since += 1;
        match self.patience {
            Some(patience) if self.since >= patience => Progress::Exhausted,
            _ => Progress::Stalled,
        }
    }
}

/// A training run, see [GpTrainer::train_model].
///
/// Each call to `next` runs one epoch. Dropping the run before it ends stops training
/// without saving the model.
pub struct Training<'a> {
    trainer: &'a mut GpTrainer,
    gp_metrics: GpMetrics,
    metrics: Vec<Metric>,
    track_nll: bool,
    early_stopping: EarlyStopping,
    epoch: usize,
    epochs: usize,
    save_dir: Option<PathBuf>,
    save_format: GpFileFormat,
    stop: bool,
    done: bool,
}

impl Training<'_> {
    /// Metrics computed after each epoch
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Validation metrics handler
    pub fn gp_metrics(&self) -> &GpMetrics {
        &self.gp_metrics
    }

    fn run_epoch(&mut self) -> Result<EpochMetrics> {
        let loss = self.trainer.optimize_cycle()?;
        self.trainer.loss = loss;
        self.trainer.training_steps += 1;
        self.epoch += 1;

        self.gp_metrics.refresh(&*self.trainer, &self.metrics)?;
        let mut values = BTreeMap::new();
        for &metric in &self.metrics {
            let value = self.gp_metrics.compute(metric)?;
            if let Some(v) = value.as_scalar() {
                self.trainer.metrics.insert(metric, v);
            }
            values.insert(metric, value);
        }
        debug!(
            "Epoch {}/{} step={} loss={} {}",
            self.epoch,
            self.epochs,
            self.trainer.training_steps,
            loss,
            self.trainer.kernel
        );

        if self.track_nll {
            match self.early_stopping.update(self.trainer.metric(Metric::Nll)) {
                Progress::Improved if self.trainer.ckpt_manager.is_some() => {
                    self.trainer.save_checkpoint()?;
                }
                Progress::Improved => (),
                Progress::Stalled => (),
                Progress::Exhausted => {
                    info!(
                        "Patience exceeded: {} steps since NLL improvement.",
                        self.early_stopping.since
                    );
                    self.stop = true;
                }
            }
        }

        Ok(EpochMetrics {
            step: self.trainer.training_steps,
            loss,
            values,
        })
    }

    fn finish(&self) -> Result<()> {
        if let Some(dir) = &self.save_dir {
            self.trainer.save_model(dir, self.save_format)?;
        }
        Ok(())
    }
}

impl Iterator for Training<'_> {
    type Item = Result<EpochMetrics>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.stop || self.epoch >= self.epochs {
            self.done = true;
            return self.finish().err().map(Err);
        }
        let epoch = self.run_epoch();
        if epoch.is_err() {
            self.done = true;
        }
        Some(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_points::convert_index_points;
    use crate::kernels::KernelKind;
    use crate::parameters::Positivity;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, Axis, array};
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use rand_xoshiro::Xoshiro256Plus;

    fn sin_data(n: usize, seed: u64) -> (IndexPoints, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let x = Array::random_using((n, 2), Uniform::<f64>::new(0., 1.), &mut rng);
        let y = x.map_axis(Axis(1), |r| (3. * r[0]).sin() + r[1]);
        (convert_index_points(&x).unwrap(), y)
    }

    #[test]
    fn test_early_stopping() {
        let mut es = EarlyStopping::new(Some(3), f64::INFINITY);
        assert_eq!(Progress::Improved, es.update(2.));
        assert_eq!(Progress::Stalled, es.update(2.));
        assert_eq!(Progress::Exhausted, es.update(2.5));
        assert_eq!(Progress::Improved, es.update(1.));
        assert_eq!(1, es.since);

        let mut es = EarlyStopping::new(None, 1.);
        for _ in 0..10 {
            assert_eq!(Progress::Stalled, es.update(f64::NAN));
        }
    }

    #[test]
    fn test_default_state() {
        let (x, y) = sin_data(10, 0);
        let trainer = GpTrainer::new(x, y, None::<&str>).unwrap();
        assert_eq!(1., trainer.amplitude());
        assert_eq!(1., trainer.length_scale());
        assert_eq!(0, trainer.training_steps());
        assert!(trainer.loss().is_nan());
        assert_eq!(5, trainer.metrics().len());
        assert!(trainer.metrics().values().all(|v| v.is_nan()));
        assert!(trainer.checkpoint_manager().is_none());
    }

    #[test]
    fn test_shape_mismatch() {
        let (x, _) = sin_data(10, 0);
        assert!(matches!(
            GpTrainer::new(x, Array1::zeros(9), None::<&str>),
            Err(GpError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_optimize_cycle_updates_hyperparameters() {
        let (x, y) = sin_data(15, 1);
        let mut trainer = GpTrainer::new(x, y, None::<&str>).unwrap();
        let kernel = *trainer.kernel();
        let (nll, _) = trainer.prior().nll_with_gradients(&kernel).unwrap();
        let loss = trainer.optimize_cycle().unwrap();
        assert_abs_diff_eq!(nll, loss, epsilon = 1e-12);
        assert_ne!(kernel, *trainer.kernel());
        // Adam first step moves each hyperparameter by about the learning rate
        assert_abs_diff_eq!(1e-3, (trainer.amplitude() - 1.).abs(), epsilon = 1e-5);
        assert_abs_diff_eq!(1e-3, (trainer.length_scale() - 1.).abs(), epsilon = 1e-5);
        // Only train_model tracks steps and loss
        assert_eq!(0, trainer.training_steps());
        assert!(trainer.loss().is_nan());
    }

    #[test]
    fn test_log_transform_keeps_positivity() {
        let (x, y) = sin_data(15, 2);
        let params = GpTrainer::params()
            .kernel(KernelKind::ExponentiatedQuadratic)
            .learning_rate(0.5)
            .positivity(Positivity::LogTransform)
            .check()
            .unwrap();
        let mut trainer = GpTrainer::with_params(params, x, y).unwrap();
        for _ in 0..50 {
            trainer.optimize_cycle().unwrap();
            assert!(trainer.amplitude() > 0.);
            assert!(trainer.length_scale() > 0.);
        }
    }

    #[test]
    fn test_train_model_metrics() {
        let (x, y) = sin_data(20, 3);
        let (xv, yv) = sin_data(8, 4);
        let mut trainer = GpTrainer::new(x, y, None::<&str>).unwrap();
        let options = TrainOptions::new()
            .epochs(5)
            .metrics(&["mae", "residuals", "pis", "sharpness"]);
        let epochs: Vec<_> = trainer
            .train_model(&xv, &yv, options)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(5, epochs.len());
        for (i, epoch) in epochs.iter().enumerate() {
            assert_eq!(i as u64 + 1, epoch.step);
            assert!(epoch.loss.is_finite());
            assert_eq!(4, epoch.values.len());
            assert!(epoch.get(Metric::Nll).is_none());
            assert!(matches!(
                epoch.get(Metric::Residuals),
                Some(MetricValue::Vector(r)) if r.len() == 8
            ));
            assert!(matches!(epoch.get(Metric::Pis), Some(MetricValue::Intervals { .. })));
        }
        assert_eq!(5, trainer.training_steps());
        assert_eq!(epochs[4].loss, trainer.loss());
        assert_eq!(epochs[4].scalar(Metric::Mae), Some(trainer.metric(Metric::Mae)));
        assert!(trainer.metric(Metric::Sharpness) > 0.);
        // Not requested, not computed
        assert!(trainer.metric(Metric::Nll).is_nan());
        assert!(trainer.metric(Metric::Variation).is_nan());
    }

    #[test]
    fn test_patience_requires_nll() {
        let (x, y) = sin_data(10, 5);
        let mut trainer = GpTrainer::new(x.clone(), y.clone(), None::<&str>).unwrap();
        let options = TrainOptions::new().epochs(2).patience(Some(100)).metrics(&["mae"]);
        let training = trainer.train_model(&x, &y, options).unwrap();
        assert_eq!(&[Metric::Mae, Metric::Nll], training.metrics());
        for epoch in training {
            assert!(epoch.unwrap().scalar(Metric::Nll).is_some());
        }
    }

    #[test]
    fn test_invalid_metric() {
        let (x, y) = sin_data(10, 6);
        let mut trainer = GpTrainer::new(x.clone(), y.clone(), None::<&str>).unwrap();
        let options = TrainOptions::new().metrics(&["nll", "bogus"]);
        match trainer.train_model(&x, &y, options) {
            Err(GpError::InvalidMetric(name)) => assert_eq!("bogus", name),
            _ => panic!("bogus metric should be rejected"),
        }
        assert_eq!(0, trainer.training_steps());
        assert_eq!(1., trainer.amplitude());
    }

    #[test]
    fn test_save_checkpoint_without_directory() {
        let (x, y) = sin_data(5, 7);
        let mut trainer = GpTrainer::new(x, y, None::<&str>).unwrap();
        assert!(matches!(
            trainer.save_checkpoint(),
            Err(GpError::CheckpointError(_))
        ));
    }

    #[test]
    fn test_incompatible_checkpoint() {
        let dir = PathBuf::from("target/tests/trainer_incompatible_ckpt");
        let _ = std::fs::remove_dir_all(&dir);
        let (x, y) = sin_data(6, 8);
        let mut trainer = GpTrainer::new(x, y, Some(&dir)).unwrap();
        trainer.save_checkpoint().unwrap();

        let x1 = convert_index_points(&array![[0.], [1.], [2.], [3.], [4.], [5.]]).unwrap();
        let y1 = Array1::zeros(6);
        assert!(matches!(
            GpTrainer::new(x1, y1, Some(&dir)),
            Err(GpError::CheckpointError(_))
        ));
    }
}
