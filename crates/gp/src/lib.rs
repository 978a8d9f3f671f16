//! This library trains a [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process)
//! regression head on fixed feature vectors, typically embeddings extracted from a pretrained
//! graph neural network, to predict a scalar property with calibrated uncertainty.
//!
//! The GP has a zero mean and a stationary kernel (see [kernels]) whose amplitude and length
//! scale are fitted with Adam steps on the negative log marginal likelihood of observations.
//! Training is driven by [GpTrainer], configured with [TrainerParams] and [TrainOptions]:
//! it supports patience based early stopping on validation NLL, checkpointing of the latest
//! best state and saving the trained model.
//!
//! Predictive uncertainty is evaluated against held-out data with [GpMetrics]
//! (see [metrics]): NLL, MAE, sharpness, coefficient of variation, calibration error and
//! percentile interval densities.
//!
//! Raw `(N, D)` feature arrays are turned into [IndexPoints] with [convert_index_points],
//! usually after a global [FeatureScaler] is applied.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod checkpoint;
mod errors;
mod index_points;
pub mod kernels;
pub mod metrics;
mod optimization;
mod parameters;
mod persistence;
mod prior;
mod regression;
mod scaling;
mod trainer;
mod utils;

pub use checkpoint::*;
pub use errors::*;
pub use index_points::*;
pub use kernels::{Kernel, KernelKind};
pub use metrics::{GpMetrics, Metric, MetricValue};
pub use optimization::{AdamParams, AdamState};
pub use parameters::*;
pub use persistence::*;
pub use prior::GpPrior;
pub use regression::{GpPredictor, GpRegressionModel};
pub use scaling::FeatureScaler;
pub use trainer::*;
pub use utils::pairwise_distances;

/// Default value added to kernel matrix diagonals
pub const GP_DEFAULT_JITTER: f64 = 1e-6;
/// Default Adam learning rate
pub const GP_DEFAULT_LEARNING_RATE: f64 = 1e-3;
/// Default maximum number of training epochs
pub const GP_DEFAULT_EPOCHS: usize = 1000;
