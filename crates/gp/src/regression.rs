use crate::errors::{GpError, Result};
use crate::index_points::IndexPoints;
use crate::kernels::Kernel;
use crate::prior::{cholesky_with_jitter, mvn_log_prob};
use crate::utils::pairwise_distances;

use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use std::fmt;

/// A trait for GP models which can be conditioned at query points
pub trait GpPredictor {
    /// Regression model conditioned on observations, evaluated at `index_points`
    fn get_model(&self, index_points: &IndexPoints) -> Result<GpRegressionModel>;

    /// Predictive mean and standard deviation at `points`
    fn predict(&self, points: &IndexPoints) -> Result<(Array1<f64>, Array1<f64>)> {
        let gprm = self.get_model(points)?;
        Ok((gprm.mean(), gprm.stddev()?))
    }
}

/// Gaussian process regression model: the posterior predictive distribution
/// at a set of query points, conditioned on observations.
///
/// Built from the current kernel hyperparameters and never updated afterwards:
/// build a new one once hyperparameters change. Mean, variances and covariance
/// are computed on demand.
#[derive(Clone, Debug)]
pub struct GpRegressionModel {
    kernel: Kernel,
    jitter: f64,
    /// Lower cholesky factor of observations covariance `k(X, X) + jitter * I`
    chol: Array2<f64>,
    /// `(k(X, X) + jitter * I)^-1 y`
    alpha: Array1<f64>,
    /// Cross covariance `k(X, Q)` (nobs, nquery)
    cross_cov: Array2<f64>,
    /// Query index points (nquery, nx)
    query: Array2<f64>,
}

impl fmt::Display for GpRegressionModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GPRM(kernel={}, nobs={}, nquery={})",
            self.kernel,
            self.chol.nrows(),
            self.query.nrows()
        )
    }
}

impl GpRegressionModel {
    pub(crate) fn new(
        kernel: Kernel,
        jitter: f64,
        chol: Array2<f64>,
        obs_points: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        observations: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        query: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Self> {
        let z = chol.solve_triangular(&observations.view().insert_axis(Axis(1)), UPLO::Lower)?;
        let alpha = chol
            .t()
            .solve_triangular(&z, UPLO::Upper)?
            .remove_axis(Axis(1));
        let cross_cov = kernel.matrix(&pairwise_distances(obs_points, query));
        Ok(GpRegressionModel {
            kernel,
            jitter,
            chol,
            alpha,
            cross_cov,
            query: query.to_owned(),
        })
    }

    /// Kernel the model was built with
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Number of query points
    pub fn len(&self) -> usize {
        self.query.nrows()
    }

    /// Whether the model has no query point
    pub fn is_empty(&self) -> bool {
        self.query.nrows() == 0
    }

    /// Predictive mean at each query point
    pub fn mean(&self) -> Array1<f64> {
        self.cross_cov.t().dot(&self.alpha)
    }

    /// `chol^-1 k(X, Q)`
    fn whitened_cross_cov(&self) -> Result<Array2<f64>> {
        Ok(self.chol.solve_triangular(&self.cross_cov, UPLO::Lower)?)
    }

    /// Predictive variance at each query point
    pub fn variance(&self) -> Result<Array1<f64>> {
        let v = self.whitened_cross_cov()?;
        let var = self.kernel.variance() - v.mapv(|e| e * e).sum_axis(Axis(0));
        // Variance might be slightly negative depending on
        // machine precision: set to zero in that case
        Ok(var.mapv(|e| if e < 0. { 0. } else { e }))
    }

    /// Predictive standard deviation at each query point
    pub fn stddev(&self) -> Result<Array1<f64>> {
        Ok(self.variance()?.mapv(f64::sqrt))
    }

    /// Predictive covariance matrix between query points (nquery, nquery)
    pub fn covariance(&self) -> Result<Array2<f64>> {
        let v = self.whitened_cross_cov()?;
        let prior = self
            .kernel
            .matrix(&pairwise_distances(&self.query, &self.query));
        Ok(prior - v.t().dot(&v))
    }

    /// Joint log probability of `values` at the query points
    pub fn log_prob(&self, values: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<f64> {
        if values.len() != self.len() {
            return Err(GpError::ShapeMismatch(format!(
                "{} values given for {} query points",
                values.len(),
                self.len()
            )));
        }
        let chol = cholesky_with_jitter(self.covariance()?, self.jitter)?;
        let centered = values.to_owned() - self.mean();
        mvn_log_prob(&chol, &centered)
    }
}
