//! A module for metrics evaluating GP predictive uncertainty against held-out data.
//!
//! Most metrics follow the definitions used for uncertainty quantification in
//! Tran, Kevin, et al. "Methods for comparing uncertainty quantifications for material
//! property predictions." Machine Learning: Science and Technology 1.2 (2020): 025006,
//! which builds upon calibration as proposed by
//! Kuleshov, Volodymyr, et al. "Accurate uncertainties for deep learning using
//! calibrated regression." ICML (2018).
//!
//! Metrics are pure functions of the regression model predictive mean and standard
//! deviations at the validation points. Those are stored by [GpMetrics] and refreshed
//! on demand as declared by [Metric::requires].

use crate::errors::{GpError, Result};
use crate::index_points::IndexPoints;
use crate::regression::{GpPredictor, GpRegressionModel};
use crate::utils::unit_linspace;

use ndarray::{Array1, ArrayBase, Data, Ix1, Zip};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Number of nominal levels used for percentile interval densities
pub const PI_LEVELS: usize = 100;

/// Validation metrics available while training
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Negative log likelihood of validation observations
    Nll,
    /// Mean absolute error
    Mae,
    /// Root mean square of predicted standard deviations
    Sharpness,
    /// Coefficient of variation of predicted standard deviations
    Variation,
    /// Calibration error
    CalibrationErr,
    /// Residuals, predicted mean minus observations
    Residuals,
    /// Percentile interval densities
    Pis,
}

/// Derived quantities metrics are computed from
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quantity {
    /// Regression model built from current kernel hyperparameters
    Model,
    /// Predictive mean at validation points
    Mean,
    /// Predictive standard deviations at validation points
    Stddev,
}

impl Metric {
    /// All metrics, in declaration order
    pub const ALL: [Metric; 7] = [
        Metric::Nll,
        Metric::Mae,
        Metric::Sharpness,
        Metric::Variation,
        Metric::CalibrationErr,
        Metric::Residuals,
        Metric::Pis,
    ];

    /// Metrics whose value is a single scalar
    pub const SCALARS: [Metric; 5] = [
        Metric::Nll,
        Metric::Mae,
        Metric::Sharpness,
        Metric::Variation,
        Metric::CalibrationErr,
    ];

    /// Metric name
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Nll => "nll",
            Metric::Mae => "mae",
            Metric::Sharpness => "sharpness",
            Metric::Variation => "variation",
            Metric::CalibrationErr => "calibration_err",
            Metric::Residuals => "residuals",
            Metric::Pis => "pis",
        }
    }

    /// Quantities which have to be current before computing the metric
    pub fn requires(&self) -> &'static [Quantity] {
        match self {
            Metric::Nll => &[Quantity::Model],
            Metric::Mae | Metric::Residuals => &[Quantity::Model, Quantity::Mean],
            Metric::CalibrationErr | Metric::Pis => {
                &[Quantity::Model, Quantity::Mean, Quantity::Stddev]
            }
            Metric::Sharpness | Metric::Variation => &[Quantity::Model, Quantity::Stddev],
        }
    }

    /// Whether the metric value is a scalar
    pub fn is_scalar(&self) -> bool {
        Metric::SCALARS.contains(self)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Metric {
    type Err = GpError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| GpError::InvalidMetric(s.to_string()))
    }
}

/// Parse metric names, failing on the first unknown one
pub fn parse_metrics<S: AsRef<str>>(names: &[S]) -> Result<Vec<Metric>> {
    names.iter().map(|name| name.as_ref().parse()).collect()
}

/// Union of the quantities required by `metrics`
pub fn required_quantities(metrics: &[Metric]) -> BTreeSet<Quantity> {
    metrics
        .iter()
        .flat_map(|m| m.requires().iter().copied())
        .collect()
}

/// Value of a computed metric
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Scalar metric value
    Scalar(f64),
    /// One value per validation point
    Vector(Array1<f64>),
    /// Nominal levels and matching empirical fractions
    Intervals {
        /// Nominal percentile levels
        predicted: Array1<f64>,
        /// Empirical fraction of normalized residuals within each level
        observed: Array1<f64>,
    },
}

impl MetricValue {
    /// Scalar value if any
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

/// Data needed to plot the distribution of predicted standard deviations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharpnessReport {
    /// Predicted standard deviations
    pub stddevs: Array1<f64>,
    /// See [GpMetrics::sharpness]
    pub sharpness: f64,
    /// See [GpMetrics::variation]
    pub variation: f64,
}

/// Data needed to plot a calibration curve
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Nominal percentile levels
    pub predicted_pi: Array1<f64>,
    /// Empirical fraction of normalized residuals within each level
    pub observed_pi: Array1<f64>,
}

/// Metrics of a GP regression model against validation points and observations.
///
/// The regression model, mean and standard deviations are computed eagerly at construction,
/// then only when refreshed. `GpMetrics` does not keep a reference to the GP (usually
/// a [trainer](crate::GpTrainer)), which is passed whenever the regression model has to
/// be rebuilt.
#[derive(Clone, Debug)]
pub struct GpMetrics {
    val_points: IndexPoints,
    val_obs: Array1<f64>,
    gprm: GpRegressionModel,
    mean: Array1<f64>,
    stddevs: Array1<f64>,
}

impl GpMetrics {
    /// Build metrics for `model` regression model at validation points
    pub fn new(
        model: &impl GpPredictor,
        val_points: &IndexPoints,
        val_obs: &Array1<f64>,
    ) -> Result<Self> {
        if val_points.len() != val_obs.len() {
            return Err(GpError::ShapeMismatch(format!(
                "{} validation points given for {} validation observations",
                val_points.len(),
                val_obs.len()
            )));
        }
        if val_points.is_empty() {
            return Err(GpError::ShapeMismatch(
                "at least one validation point is required".to_string(),
            ));
        }
        let gprm = model.get_model(val_points)?;
        let mean = gprm.mean();
        let stddevs = gprm.stddev()?;
        Ok(GpMetrics {
            val_points: val_points.clone(),
            val_obs: val_obs.to_owned(),
            gprm,
            mean,
            stddevs,
        })
    }

    /// Rebuild the regression model from current `model` hyperparameters
    pub fn update_model(&mut self, model: &impl GpPredictor) -> Result<()> {
        self.gprm = model.get_model(&self.val_points)?;
        Ok(())
    }

    /// Update predictive mean from the regression model
    pub fn update_mean(&mut self) {
        self.mean = self.gprm.mean();
    }

    /// Update predictive standard deviations from the regression model
    pub fn update_stddevs(&mut self) -> Result<()> {
        self.stddevs = self.gprm.stddev()?;
        Ok(())
    }

    /// Refresh only the quantities required to compute `metrics`
    pub fn refresh(&mut self, model: &impl GpPredictor, metrics: &[Metric]) -> Result<()> {
        for quantity in required_quantities(metrics) {
            match quantity {
                Quantity::Model => self.update_model(model)?,
                Quantity::Mean => self.update_mean(),
                Quantity::Stddev => self.update_stddevs()?,
            }
        }
        Ok(())
    }

    /// Compute given metric from current quantities
    pub fn compute(&self, metric: Metric) -> Result<MetricValue> {
        let value = match metric {
            Metric::Nll => MetricValue::Scalar(self.nll()?),
            Metric::Mae => MetricValue::Scalar(self.mae()),
            Metric::Sharpness => MetricValue::Scalar(self.sharpness()),
            Metric::Variation => MetricValue::Scalar(self.variation()),
            Metric::CalibrationErr => MetricValue::Scalar(self.calibration_err()),
            Metric::Residuals => MetricValue::Vector(self.residuals()),
            Metric::Pis => {
                let (predicted, observed) = self.pis();
                MetricValue::Intervals {
                    predicted,
                    observed,
                }
            }
        };
        Ok(value)
    }

    /// Current regression model
    pub fn model(&self) -> &GpRegressionModel {
        &self.gprm
    }

    /// Current predictive mean
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Current predictive standard deviations
    pub fn stddevs(&self) -> &Array1<f64> {
        &self.stddevs
    }

    /// Negative log likelihood of validation observations
    pub fn nll(&self) -> Result<f64> {
        Ok(-self.gprm.log_prob(&self.val_obs)?)
    }

    /// Mean absolute error of predicted values
    pub fn mae(&self) -> f64 {
        self.residuals().mapv(f64::abs).mean().unwrap_or(f64::NAN)
    }

    /// Root mean square of predicted standard deviations
    pub fn sharpness(&self) -> f64 {
        root_mean_square(&self.stddevs)
    }

    /// Coefficient of variation of predicted standard deviations,
    /// indicates dispersion of uncertainty estimates.
    pub fn variation(&self) -> f64 {
        coefficient_of_variation(&self.stddevs)
    }

    /// Calibration error, see [calibration_error]
    pub fn calibration_err(&self) -> f64 {
        let (predicted, observed) = self.pis();
        calibration_error(&predicted, &observed)
    }

    /// Predicted mean minus validation observations
    pub fn residuals(&self) -> Array1<f64> {
        &self.mean - &self.val_obs
    }

    /// Percentile interval densities, see [percentile_interval_densities]
    pub fn pis(&self) -> (Array1<f64>, Array1<f64>) {
        percentile_interval_densities(&self.residuals(), &self.stddevs)
    }

    /// Inputs of a sharpness plot
    pub fn sharpness_report(&self) -> SharpnessReport {
        SharpnessReport {
            stddevs: self.stddevs.clone(),
            sharpness: self.sharpness(),
            variation: self.variation(),
        }
    }

    /// Inputs of a calibration plot
    pub fn calibration_report(&self) -> CalibrationReport {
        let (predicted_pi, observed_pi) = self.pis();
        CalibrationReport {
            predicted_pi,
            observed_pi,
        }
    }
}

fn root_mean_square(x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> f64 {
    x.mapv(|v| v * v).mean().unwrap_or(f64::NAN).sqrt()
}

/// `sqrt(sum((s - mean(s))^2)) / (mean(s) * (n - 1))`
///
/// Zero when less than two values are given or when they are all zero,
/// where the formula itself would divide by zero.
fn coefficient_of_variation(stddevs: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> f64 {
    let n = stddevs.len();
    let mean = stddevs.mean().unwrap_or(0.);
    if n < 2 || mean == 0. {
        return 0.;
    }
    let dispersion = stddevs.mapv(|s| (s - mean) * (s - mean)).sum().sqrt();
    dispersion / (mean * (n - 1) as f64)
}

/// Percentile interval densities of residuals given predicted standard deviations.
///
/// Residuals are normalized by standard deviations, then for each of [PI_LEVELS]
/// nominal levels `p` evenly spaced in `[0, 1]`, the fraction of normalized residuals
/// lower than or equal to the standard normal quantile of `p` is computed.
///
/// Returns `(predicted, observed)`: nominal levels and empirical fractions.
/// A well calibrated model has `observed` close to `predicted`.
pub fn percentile_interval_densities(
    residuals: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    stddevs: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> (Array1<f64>, Array1<f64>) {
    let mut normalized = Array1::zeros(residuals.len());
    Zip::from(&mut normalized)
        .and(residuals)
        .and(stddevs)
        .for_each(|z, &r, &s| *z = r / s);

    let predicted = unit_linspace(PI_LEVELS);
    let n = normalized.len() as f64;
    let observed = normal_bounds(&predicted)
        .mapv(|bound| normalized.iter().filter(|&&z| z <= bound).count() as f64 / n);
    (predicted, observed)
}

/// Standard normal quantiles of `levels`, infinite at 0 and 1
fn normal_bounds(levels: &Array1<f64>) -> Array1<f64> {
    let normal = Normal::standard();
    levels.mapv(|p| {
        if p <= 0. {
            f64::NEG_INFINITY
        } else if p >= 1. {
            f64::INFINITY
        } else {
            normal.inverse_cdf(p)
        }
    })
}

/// Sum of squared differences between nominal and empirical coverages
pub fn calibration_error(
    predicted: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    observed: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> f64 {
    (predicted.to_owned() - observed).mapv(|d| d * d).sum()
}
